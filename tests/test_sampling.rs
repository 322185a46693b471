use chaincrf::{
    sampling::{
        Alignment, AlignmentPrior, AnnealingType, BoxedModel, ConflictGraph, CoolingSchedule, FactoredModel,
        SamplingStyle, SequenceGibbsSampler, SequenceModel, SequentialModel,
    },
    Alphabet, CliqueTree, Document, FeatureMap, LabelIndices, LinearPotential, ModelContext, Weights,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Three labels, window 2. Node features 0..3 cycle with the position
/// (shifted by `shift`); feature 3 is the transition bias.
fn crf(len: usize, shift: usize) -> CliqueTree {
    let labels: Alphabet = ["O", "PER", "LOC"].into_iter().collect();
    let context = ModelContext::new(labels, "O", 2).unwrap();
    let indices = LabelIndices::full(3, 2);
    let map = FeatureMap::new(vec![1, 1, 1, 2]);
    let mut weights = Weights::zeros(&map, &indices);
    for f in 0..4 {
        for k in 0..weights.row(f).unwrap().len() {
            let w = ((f * 5 + k * 7) % 9) as f64 / 4.0 - 1.0 + ((f + 2 * k + 1) as f64).sqrt() / 13.0;
            weights.set(f, k, w);
        }
    }
    let features = (0..len).map(|t| vec![vec![(t + shift) % 3], vec![3]]).collect();
    let doc = Document::unlabeled(features, None).unwrap();
    CliqueTree::build(&doc, &context, &indices, &LinearPotential::new(&weights)).unwrap()
}

#[test]
fn annealing_recovers_the_best_sequence() {
    init_logger();
    let schedule = CoolingSchedule::new(AnnealingType::Exponential, 0.9, 100);
    let mut hits = 0;
    for seed in 0..10 {
        let mut tree = crf(5, 0);
        let best = tree.best_sequence();
        let mut sampler = SequenceGibbsSampler::new(seed);
        let found = sampler.find_best_using_annealing(&mut tree, &schedule, None).unwrap();
        if found == best {
            hits += 1;
        }
    }
    assert!(hits >= 8, "annealing found the best sequence {hits}/10 times");
}

#[test]
fn chain_coloring_is_valid() {
    init_logger();
    let tree = crf(6, 0);
    let graph = ConflictGraph::for_model(&tree);
    let classes = graph.color();
    assert_eq!(classes.len(), 2);
    assert!(graph.is_valid_coloring(&classes));
}

fn marginals(samples: &[Vec<usize>], len: usize) -> Vec<Vec<f64>> {
    let mut counts = vec![vec![0.0; 3]; len];
    for s in samples {
        for (t, &l) in s.iter().enumerate() {
            counts[t][l] += 1.0;
        }
    }
    for row in counts.iter_mut() {
        row.iter_mut().for_each(|c| *c /= samples.len() as f64);
    }
    counts
}

#[test]
fn chromatic_and_sequential_sampling_agree() {
    init_logger();
    let len = 4;
    let exact: Vec<Vec<f64>> = {
        let tree = crf(len, 1);
        (0..len).map(|t| tree.probs(t)).collect()
    };
    for (style, seed) in [(SamplingStyle::Sequential, 21), (SamplingStyle::Chromatic, 22)] {
        let mut tree = crf(len, 1);
        let mut sampler = SequenceGibbsSampler::new(seed).with_style(style).with_chromatic_size(1);
        let samples = sampler.collect_samples(&mut tree, 6000, 1, None).unwrap();
        let empirical = marginals(&samples, len);
        for t in 0..len {
            for l in 0..3 {
                let diff = (empirical[t][l] - exact[t][l]).abs();
                assert!(diff < 0.05, "{style:?} t {t} l {l}: {} vs {}", empirical[t][l], exact[t][l]);
            }
        }
    }
}

#[test]
fn aligned_sequences_are_decoded_jointly() {
    init_logger();
    let (len_a, len_b) = (4, 3);
    let alignment = Alignment::parse("0-0-0.9 1-2-0.8 2-3-0.95 0-3-0.01", 0.1).unwrap();
    assert_eq!(alignment.len(), 3);
    let prior = AlignmentPrior::new(&alignment, len_a, len_b, 3, 20.0).unwrap();

    let crfs: Vec<BoxedModel> = vec![Box::new(crf(len_a, 0)), Box::new(crf(len_b, 2))];
    let pair = SequentialModel::new(crfs);
    let components: Vec<BoxedModel> = vec![Box::new(pair), Box::new(prior)];
    let mut model = FactoredModel::new(components);
    assert_eq!(model.length(), len_a + len_b);

    let graph = ConflictGraph::from_alignment(&alignment, len_a, len_b);
    let partition = graph.color();
    assert!(graph.is_valid_coloring(&partition));

    let mut sampler = SequenceGibbsSampler::new(5)
        .with_style(SamplingStyle::Chromatic)
        .with_partition(partition);
    let schedule = CoolingSchedule::new(AnnealingType::Exponential, 0.9, 120);
    let decoded = sampler.find_best_using_annealing(&mut model, &schedule, None).unwrap();
    assert_eq!(decoded.len(), len_a + len_b);
    for link in alignment.links() {
        assert_eq!(decoded[link.a], decoded[len_a + link.b], "{link:?}");
    }
}
