//! Refspec parsing, matching, and expansion.
//!
//! Shape: `[+]<src>[:<dst>]`. `+` forces the update. At most one `*` may
//! appear on each side; if either side is wildcarded, both must be.

use crate::ProtocolError;

/// A parsed refspec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefSpec {
    /// Source pattern (left side of the colon, or the whole spec if no colon).
    pub source: String,
    /// Destination pattern (right side of the colon), absent for a source-only spec.
    pub destination: Option<String>,
    /// Force update (leading `+`).
    pub force: bool,
}

impl RefSpec {
    /// Parse a refspec string like `+refs/heads/*:refs/remotes/origin/*`.
    pub fn parse(spec: &str) -> Result<Self, ProtocolError> {
        if spec.is_empty() {
            return Err(ProtocolError::RefspecMalformed("empty refspec".into()));
        }

        let (force, rest) = match spec.strip_prefix('+') {
            Some(s) => (true, s),
            None => (false, spec),
        };

        if rest.is_empty() {
            return Err(ProtocolError::RefspecMalformed(
                "refspec has no source".into(),
            ));
        }

        let mut parts = rest.splitn(3, ':');
        let source = parts.next().unwrap_or_default().to_string();
        let destination = parts.next().map(|s| s.to_string());
        if parts.next().is_some() {
            return Err(ProtocolError::RefspecMalformed(format!(
                "more than one ':' in refspec: {spec}"
            )));
        }

        if count_stars(&source) > 1 {
            return Err(ProtocolError::RefspecMalformed(format!(
                "more than one '*' on the source side: {spec}"
            )));
        }
        if let Some(ref dst) = destination {
            if count_stars(dst) > 1 {
                return Err(ProtocolError::RefspecMalformed(format!(
                    "more than one '*' on the destination side: {spec}"
                )));
            }
            if (source.contains('*')) != (dst.contains('*')) {
                return Err(ProtocolError::RefspecMalformed(format!(
                    "either both sides of a refspec must be wildcarded or neither: {spec}"
                )));
            }
        }

        Ok(RefSpec {
            source,
            destination,
            force,
        })
    }

    /// Re-serialize in canonical `[+]<src>[:<dst>]` form.
    pub fn to_spec_string(&self) -> String {
        let mut s = String::new();
        if self.force {
            s.push('+');
        }
        s.push_str(&self.source);
        if let Some(ref dst) = self.destination {
            s.push(':');
            s.push_str(dst);
        }
        s
    }

    pub fn is_wildcard(&self) -> bool {
        self.source.contains('*')
    }

    /// Check whether `refname` matches this refspec's source pattern.
    pub fn matches(&self, refname: &str) -> bool {
        pattern_matches(&self.source, refname)
    }

    /// Expand `refname` (which must match the source pattern) to its destination,
    /// replacing the source's `*` match into the destination pattern.
    pub fn expand(&self, refname: &str) -> Option<String> {
        let destination = self.destination.as_ref()?;

        if let Some(star_pos) = self.source.find('*') {
            let prefix = &self.source[..star_pos];
            let suffix = &self.source[star_pos + 1..];
            if !refname.starts_with(prefix) || !refname.ends_with(suffix) {
                return None;
            }
            if refname.len() < prefix.len() + suffix.len() {
                return None;
            }
            let matched = &refname[prefix.len()..refname.len() - suffix.len()];

            let dest_star = destination.find('*')?;
            let dest_prefix = &destination[..dest_star];
            let dest_suffix = &destination[dest_star + 1..];
            Some(format!("{dest_prefix}{matched}{dest_suffix}"))
        } else if self.source == refname {
            Some(destination.clone())
        } else {
            None
        }
    }
}

fn count_stars(s: &str) -> usize {
    s.matches('*').count()
}

fn pattern_matches(pattern: &str, value: &str) -> bool {
    if let Some(star_pos) = pattern.find('*') {
        let prefix = &pattern[..star_pos];
        let suffix = &pattern[star_pos + 1..];
        value.len() >= prefix.len() + suffix.len()
            && value.starts_with(prefix)
            && value.ends_with(suffix)
    } else {
        pattern == value
    }
}

/// Map a batch of remote refs through a refspec list, returning `(remote_ref, local_ref)`
/// pairs for every remote ref that matched some refspec (first match wins).
pub fn expand_all<'a>(
    refs: impl IntoIterator<Item = &'a str>,
    refspecs: &[RefSpec],
) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for refname in refs {
        for spec in refspecs {
            if let Some(local) = spec.expand(refname) {
                out.push((refname.to_string(), local));
                break;
            }
        }
    }
    out
}
