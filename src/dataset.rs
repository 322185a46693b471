use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use crate::{
    alphabet::Alphabet,
    error::{Error, Result},
};

/// Active feature ids per position and clique size: `features[t][j]` lists
/// the features of the clique of size `j + 1` ending at position `t`.
pub type CliqueFeatures = Vec<Vec<Vec<usize>>>;
/// Real values aligned index-by-index with [`CliqueFeatures`].
pub type CliqueValues = Vec<Vec<Vec<f64>>>;

/// One labeled sequence as handed over by feature extraction.
#[derive(Debug, Clone, Default)]
pub struct Document {
    features: CliqueFeatures,
    values: Option<CliqueValues>,
    labels: Vec<usize>,
}

impl Document {
    /// Fails if `labels` or `values` disagree in shape with `features`.
    pub fn new(
        features: CliqueFeatures,
        values: Option<CliqueValues>,
        labels: Vec<usize>,
    ) -> Result<Self> {
        if labels.len() != features.len() {
            return Err(Error::DimensionMismatch {
                what: "labels",
                expected: features.len(),
                got: labels.len(),
            });
        }
        if let Some(values) = &values {
            check_values(&features, values)?;
        }
        Ok(Self {
            features,
            values,
            labels,
        })
    }

    /// A document without gold labels, for decoding.
    pub fn unlabeled(features: CliqueFeatures, values: Option<CliqueValues>) -> Result<Self> {
        let labels = vec![0; features.len()];
        Self::new(features, values, labels)
    }

    pub fn features(&self) -> &CliqueFeatures {
        &self.features
    }

    pub fn values(&self) -> Option<&CliqueValues> {
        self.values.as_ref()
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Fails unless every position carries exactly `window` clique slots.
    pub fn check_window(&self, window: usize) -> Result<()> {
        match self.features.iter().find(|p| p.len() != window) {
            Some(p) => Err(Error::DimensionMismatch {
                what: "clique slots per position",
                expected: window,
                got: p.len(),
            }),
            None => Ok(()),
        }
    }
}

fn check_values(features: &CliqueFeatures, values: &CliqueValues) -> Result<()> {
    let mismatch = |what, expected, got| Err(Error::DimensionMismatch { what, expected, got });
    if values.len() != features.len() {
        return mismatch("feature values", features.len(), values.len());
    }
    for (fp, vp) in features.iter().zip(values) {
        if fp.len() != vp.len() {
            return mismatch("feature value cliques", fp.len(), vp.len());
        }
        for (f, v) in fp.iter().zip(vp) {
            if f.len() != v.len() {
                return mismatch("feature value list", f.len(), v.len());
            }
        }
    }
    Ok(())
}

#[derive(Debug, Default, Clone)]
pub struct Dataset {
    docs: Vec<Document>,
}

impl From<Vec<Document>> for Dataset {
    fn from(docs: Vec<Document>) -> Self {
        Self { docs }
    }
}

impl Dataset {
    pub fn push(&mut self, doc: Document) {
        if !doc.is_empty() {
            self.docs.push(doc);
        }
    }

    pub fn get(&self, i: usize) -> &Document {
        &self.docs[i]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Document> {
        self.docs.iter()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn max_length(&self) -> usize {
        self.docs.iter().map(Document::len).max().unwrap_or_default()
    }

    pub fn total_items(&self) -> usize {
        self.docs.iter().map(Document::len).sum()
    }

    /// Largest feature id plus one.
    pub fn num_features(&self) -> usize {
        self.docs
            .iter()
            .flat_map(|d| d.features().iter().flatten().flatten())
            .max()
            .map_or(0, |f| f + 1)
    }

    pub fn read_file<P: AsRef<Path>>(path: P, reader: &mut TsvReader) -> Result<Self> {
        reader.read(BufReader::new(File::open(path)?))
    }
}

/// Reads `label<TAB>feature<TAB>feature...` lines, one document per
/// blank-line separated block.
///
/// Every token feature becomes a node (size 1) feature. Each larger clique
/// gets a single bias feature so that label transitions are scored.
#[derive(Debug, Clone)]
pub struct TsvReader {
    pub features: Alphabet,
    pub labels: Alphabet,
    window: usize,
    /// When false, unknown feature names are skipped instead of added.
    grow_features: bool,
}

impl TsvReader {
    pub fn new(window: usize) -> Self {
        let mut features = Alphabet::new();
        for size in 2..=window {
            features.find_or_insert(&bias_feature(size));
        }
        Self {
            features,
            labels: Alphabet::new(),
            window,
            grow_features: true,
        }
    }

    /// Reuses trained alphabets; unseen features are dropped.
    pub fn frozen(features: Alphabet, labels: Alphabet, window: usize) -> Self {
        Self {
            features,
            labels,
            window,
            grow_features: false,
        }
    }

    pub fn read<R: BufRead>(&mut self, input: R) -> Result<Dataset> {
        let mut dataset = Dataset::default();
        let mut features = Vec::new();
        let mut labels = Vec::new();
        for line in input.lines() {
            let line = line?;
            let line = line.trim_end();
            if line.is_empty() {
                if !features.is_empty() {
                    let doc = Document::new(std::mem::take(&mut features), None, std::mem::take(&mut labels))?;
                    dataset.push(doc);
                }
                continue;
            }
            let mut fields = line.split('\t');
            let label = fields.next().unwrap_or_default();
            let label = match self.labels.id_of(label) {
                Some(id) => id,
                None if self.grow_features => self.labels.find_or_insert(label),
                None => return Err(Error::UnknownLabel(label.to_string())),
            };
            let nodes: Vec<usize> = fields
                .filter(|s| !s.is_empty())
                .filter_map(|s| self.feature_id(s))
                .collect();
            let mut cliques = vec![nodes];
            for size in 2..=self.window {
                cliques.push(self.feature_id(&bias_feature(size)).into_iter().collect());
            }
            features.push(cliques);
            labels.push(label);
        }
        if !features.is_empty() {
            dataset.push(Document::new(features, None, labels)?);
        }
        log::info!(
            "read {} documents, {} items, {} features, {} labels",
            dataset.len(),
            dataset.total_items(),
            self.features.len(),
            self.labels.len()
        );
        Ok(dataset)
    }

    fn feature_id(&mut self, name: &str) -> Option<usize> {
        if self.grow_features {
            return Some(self.features.find_or_insert(name));
        }
        let id = self.features.id_of(name);
        if id.is_none() {
            log::trace!("skipping unknown feature {name}");
        }
        id
    }
}

fn bias_feature(size: usize) -> String {
    format!("__clique{size}__")
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATA: &str = "O\tw=the\nPER\tw=john\tcap\n\nLOC\tw=paris\tcap\n";

    #[test]
    fn rejects_mismatched_labels() {
        let err = Document::new(vec![vec![vec![1]]], None, vec![0, 1]).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { what: "labels", .. }));
    }

    #[test]
    fn rejects_mismatched_values() {
        let features = vec![vec![vec![1, 2]]];
        let values = vec![vec![vec![1.0]]];
        let err = Document::new(features, Some(values), vec![0]).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { what: "feature value list", .. }));
    }

    #[test]
    fn check_window_counts_slots() {
        let doc = Document::new(vec![vec![vec![1]]], None, vec![0]).unwrap();
        assert!(doc.check_window(1).is_ok());
        assert!(doc.check_window(2).is_err());
    }

    #[test]
    fn read_tsv() {
        let mut reader = TsvReader::new(2);
        let ds = reader.read(DATA.as_bytes()).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.max_length(), 2);
        assert_eq!(ds.total_items(), 3);
        assert_eq!(reader.labels.len(), 3);
        let doc = ds.get(0);
        assert_eq!(doc.labels(), &[0, 1]);
        assert_eq!(doc.features()[1][0].len(), 2);
        assert_eq!(doc.features()[1][1], vec![0]);
        assert_eq!(ds.num_features(), reader.features.len());
    }

    #[test]
    fn frozen_reader_skips_unknown_features() {
        let mut reader = TsvReader::new(2);
        reader.read(DATA.as_bytes()).unwrap();
        let mut frozen = TsvReader::frozen(reader.features.clone(), reader.labels.clone(), 2);
        let ds = frozen.read("PER\tw=john\tw=unseen\n".as_bytes()).unwrap();
        assert_eq!(ds.get(0).features()[0][0].len(), 1);
        assert!(frozen.read("MISC\tw=john\n".as_bytes()).is_err());
    }
}
