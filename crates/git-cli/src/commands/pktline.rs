use std::io::{self, Read, Write};

use anyhow::Result;
use clap::{Args, Subcommand};
use git_protocol::capability::Capabilities;
use git_protocol::pktline::{PktLine, PktLineReader, PktLineWriter};

#[derive(Args)]
pub struct PktLineArgs {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Read one line from stdin and write it framed as a pkt-line to stdout
    Encode,
    /// Read pkt-lines from stdin until flush/EOF, printing one per line
    Decode,
    /// Parse a v1 NUL-separated capability string from stdin
    Caps,
}

pub fn run(args: &PktLineArgs) -> Result<i32> {
    match args.mode {
        Mode::Encode => encode(),
        Mode::Decode => decode(),
        Mode::Caps => caps(),
    }
}

fn encode() -> Result<i32> {
    let mut data = Vec::new();
    io::stdin().read_to_end(&mut data)?;

    let stdout = io::stdout();
    let mut writer = PktLineWriter::new(stdout.lock());
    writer.write_line(&data)?;
    Ok(0)
}

fn decode() -> Result<i32> {
    let stdin = io::stdin();
    let mut reader = PktLineReader::new(stdin.lock());
    let stdout = io::stdout();
    let mut out = stdout.lock();

    loop {
        match reader.read_pkt()? {
            PktLine::Data(payload) => {
                writeln!(out, "data\t{}", String::from_utf8_lossy(&payload).trim_end())?;
            }
            PktLine::Flush => {
                writeln!(out, "flush")?;
                break;
            }
            PktLine::Delimiter => writeln!(out, "delim")?,
            PktLine::ResponseEnd => {
                writeln!(out, "response-end")?;
                break;
            }
        }
    }
    Ok(0)
}

fn caps() -> Result<i32> {
    let mut input = String::new();
    io::stdin().read_to_string(&mut input)?;

    let caps = Capabilities::parse_v1(input.trim());
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for entry in caps.entries() {
        match &entry.value {
            Some(v) => writeln!(out, "{}={}", entry.name, v)?,
            None => writeln!(out, "{}", entry.name)?,
        }
    }
    Ok(0)
}
