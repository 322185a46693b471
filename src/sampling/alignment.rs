use std::{io::BufRead, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A word-alignment link between position `a` of the first sequence and
/// position `b` of the second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentLink {
    pub a: usize,
    pub b: usize,
    pub confidence: f64,
}

/// Parses one `b-a-confidence` token. The confidence may itself contain
/// dashes (`3-1-1e-05`).
impl FromStr for AlignmentLink {
    type Err = Error;

    fn from_str(token: &str) -> Result<Self> {
        let invalid = || Error::InvalidAlignment(token.to_string());
        let mut parts = token.trim().splitn(3, '-');
        let b = parts.next().and_then(|s| s.parse().ok()).ok_or_else(invalid)?;
        let a = parts.next().and_then(|s| s.parse().ok()).ok_or_else(invalid)?;
        let confidence = parts.next().and_then(|s| s.parse().ok()).ok_or_else(invalid)?;
        Ok(Self { a, b, confidence })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Alignment {
    links: Vec<AlignmentLink>,
}

impl Alignment {
    /// Keeps the links whose confidence reaches `threshold`; duplicates are dropped.
    pub fn new(links: impl IntoIterator<Item = AlignmentLink>, threshold: f64) -> Self {
        let mut kept: Vec<AlignmentLink> = Vec::new();
        for link in links {
            if link.confidence < threshold {
                log::trace!("pruning alignment link {link:?} below {threshold}");
                continue;
            }
            if !kept.contains(&link) {
                kept.push(link);
            }
        }
        Self { links: kept }
    }

    /// One sentence pair: whitespace separated `b-a-confidence` tokens.
    pub fn parse(line: &str, threshold: f64) -> Result<Self> {
        let links = line
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<Vec<AlignmentLink>>>()?;
        Ok(Self::new(links, threshold))
    }

    /// One alignment per line; blank lines are sentence pairs without links.
    pub fn read<R: BufRead>(input: R, threshold: f64) -> Result<Vec<Self>> {
        let mut alignments = Vec::new();
        for line in input.lines() {
            alignments.push(Self::parse(&line?, threshold)?);
        }
        Ok(alignments)
    }

    pub fn links(&self) -> &[AlignmentLink] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Fails if a link points outside sequences of the given lengths.
    pub fn check_bounds(&self, len_a: usize, len_b: usize) -> Result<()> {
        match self.links.iter().find(|l| l.a >= len_a || l.b >= len_b) {
            Some(l) => Err(Error::InvalidAlignment(format!(
                "link {}-{} outside sequences of length {len_a} and {len_b}",
                l.b, l.a
            ))),
            None => Ok(()),
        }
    }
}
