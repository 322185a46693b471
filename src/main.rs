use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::PathBuf,
    time::Instant,
};

use clap::Parser;
use serde::{Deserialize, Serialize};

use chaincrf::{
    sampling::{
        Alignment, AlignmentPrior, BoxedModel, ConflictGraph, FactoredModel, LabelConsistencyPrior, SamplingStyle,
        SequenceGibbsSampler, SequenceModel, SequentialModel,
    },
    Alphabet, CliqueTree, CliquePotential, CrfConfig, CrfObjective, Dataset, Document, Error, Evaluation, FeatureMap,
    GradientDescent, LabelIndices, ModelContext, Result, Trainer, TsvReader, Weights,
};

/// Train a linear-chain CRF on tab-separated data and decode a test set,
/// exactly or with annealed Gibbs sampling.
#[derive(Debug, Parser)]
#[command(version)]
struct Argv {
    /// JSON configuration; defaults are used for missing keys
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,
    /// training data (`label<TAB>feature...`, blank line between sequences)
    #[arg(long, required = true)]
    train: PathBuf,
    /// labeled data to decode and evaluate
    #[arg(long)]
    test: Option<PathBuf>,
    /// write the trained model here as JSON
    #[arg(short, long, value_name = "MODEL")]
    model: Option<PathBuf>,
    /// decode with the Gibbs sampler instead of the exact best sequence
    #[arg(short, long)]
    gibbs: bool,
    /// weight of the label consistency prior added when sampling
    #[arg(long, default_value_t = 0.0)]
    consistency: f64,
    /// override the configured number of annealing sweeps
    #[arg(short = 'n', long)]
    num_samples: Option<usize>,
    /// second labeled test set, decoded jointly with `--test` through `--alignment`
    #[arg(long, requires_all = ["test", "alignment"])]
    aligned: Option<PathBuf>,
    /// one `b-a-confidence` line per sentence pair of `--test` and `--aligned`
    #[arg(long, requires = "aligned")]
    alignment: Option<PathBuf>,
    /// weight of the alignment prior
    #[arg(long, default_value_t = 1.0)]
    alignment_weight: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedModel {
    window: usize,
    background_symbol: String,
    features: Alphabet,
    labels: Alphabet,
    weights: Weights,
}

fn main() -> Result<()> {
    env_logger::init();
    let argv = Argv::parse();
    log::info!("argv: {:?}", argv);

    let mut config = match &argv.config {
        Some(path) => CrfConfig::from_path(path)?,
        None => CrfConfig::default(),
    };
    if let Some(n) = argv.num_samples {
        config.sampler.num_samples = n;
    }

    let mut reader = TsvReader::new(config.window);
    let train = Dataset::read_file(&argv.train, &mut reader)?;
    let context = ModelContext::new(reader.labels.clone(), &config.background_symbol, config.window)?;
    let indices = LabelIndices::observed(&context, &train);
    let map = FeatureMap::from_dataset(&train, reader.features.len());

    let begin = Instant::now();
    let objective = CrfObjective::new(
        &train,
        context.clone(),
        indices.clone(),
        map,
        config.objective.prior(),
        config.objective.threads,
    )?
    .with_potential(config.objective.potential);
    let mut trainer: GradientDescent = config.trainer.clone();
    let x = trainer.train(&objective, objective.initial(config.sampler.seed))?;
    let weights = objective.to_weights(&x)?;
    log::info!("trained {} weights in {:?}", x.len(), begin.elapsed());

    if let Some(path) = &argv.model {
        let saved = SavedModel {
            window: config.window,
            background_symbol: config.background_symbol.clone(),
            features: reader.features.clone(),
            labels: reader.labels.clone(),
            weights: weights.clone(),
        };
        serde_json::to_writer(BufWriter::new(File::create(path)?), &saved)?;
        log::info!("write model to {}", path.display());
    }

    let Some(test_path) = &argv.test else {
        return Ok(());
    };
    let mut test_reader = TsvReader::frozen(reader.features.clone(), reader.labels.clone(), config.window);
    let test = Dataset::read_file(test_path, &mut test_reader)?;
    let potential = config.objective.potential.build(&weights);
    let mut sampler = SequenceGibbsSampler::from_config(&config.sampler);
    let schedule = config.sampler.schedule();
    let mut evaluation = Evaluation::new(reader.labels.clone());

    if let (Some(aligned_path), Some(alignment_path)) = (&argv.aligned, &argv.alignment) {
        let mut aligned_reader = TsvReader::frozen(reader.features.clone(), reader.labels.clone(), config.window);
        let aligned = Dataset::read_file(aligned_path, &mut aligned_reader)?;
        let alignments = config
            .sampler
            .read_alignments(BufReader::new(File::open(alignment_path)?))?;
        if aligned.len() != test.len() || alignments.len() != test.len() {
            return Err(Error::DimensionMismatch {
                what: "aligned sentence pairs",
                expected: test.len(),
                got: aligned.len().min(alignments.len()),
            });
        }
        let begin = Instant::now();
        for ((a, b), alignment) in test.iter().zip(aligned.iter()).zip(&alignments) {
            let pair = JointPair {
                a,
                b,
                alignment,
                weight: argv.alignment_weight,
            };
            let (decoded_a, decoded_b) = pair.decode(&context, &indices, &potential, &mut sampler, &config)?;
            evaluation.accumulate(a.labels(), &decoded_a);
            evaluation.accumulate(b.labels(), &decoded_b);
        }
        log::info!("decoded {} aligned pairs in {:?}", test.len(), begin.elapsed());
        evaluation.evaluate();
        println!("{}", evaluation);
        return Ok(());
    }

    let begin = Instant::now();
    for doc in test.iter() {
        let tree = CliqueTree::build(doc, &context, &indices, &potential)?;
        let best = tree.best_sequence();
        let prediction = if argv.gibbs {
            let initial = if config.sampler.init_viterbi { Some(best) } else { None };
            // first node feature stands in for the token identity
            let tokens = doc
                .features()
                .iter()
                .map(|cliques| cliques[0].first().copied().unwrap_or(usize::MAX))
                .collect();
            let prior = LabelConsistencyPrior::new(tokens, context.background(), context.num_classes(), argv.consistency);
            let components: Vec<BoxedModel> = vec![Box::new(tree), Box::new(prior)];
            let mut model = FactoredModel::new(components);
            let decoded = sampler.find_best_using_annealing(&mut model, &schedule, initial)?;
            log::debug!("decoded score: {:.4}", model.score_of(&decoded));
            decoded
        } else {
            best
        };
        evaluation.accumulate(doc.labels(), &prediction);
    }
    log::info!("decoded {} sequences in {:?}", test.len(), begin.elapsed());

    evaluation.evaluate();
    println!("{}", evaluation);
    Ok(())
}

/// Two documents decoded together, aligned positions pulled toward the same label.
struct JointPair<'a> {
    a: &'a Document,
    b: &'a Document,
    alignment: &'a Alignment,
    weight: f64,
}

impl JointPair<'_> {
    fn decode<P>(
        &self,
        context: &ModelContext,
        indices: &LabelIndices,
        potential: &P,
        sampler: &mut SequenceGibbsSampler,
        config: &CrfConfig,
    ) -> Result<(Vec<usize>, Vec<usize>)>
    where
        P: CliquePotential + ?Sized,
    {
        let (len_a, len_b) = (self.a.len(), self.b.len());
        let tree_a = CliqueTree::build(self.a, context, indices, potential)?;
        let tree_b = CliqueTree::build(self.b, context, indices, potential)?;
        let mut initial = tree_a.best_sequence();
        initial.extend(tree_b.best_sequence());
        let prior = AlignmentPrior::new(self.alignment, len_a, len_b, context.num_classes(), self.weight)?;

        let chains: Vec<BoxedModel> = vec![Box::new(tree_a), Box::new(tree_b)];
        let components: Vec<BoxedModel> = vec![Box::new(SequentialModel::new(chains)), Box::new(prior)];
        let mut model = FactoredModel::new(components);
        if sampler.style() == SamplingStyle::Chromatic {
            sampler.set_partition(Some(ConflictGraph::from_alignment(self.alignment, len_a, len_b).color()));
        }
        let initial = config.sampler.init_viterbi.then_some(initial);
        let mut decoded = sampler.find_best_using_annealing(&mut model, &config.sampler.schedule(), initial)?;
        let decoded_b = decoded.split_off(len_a);
        Ok((decoded, decoded_b))
    }
}
