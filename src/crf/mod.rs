pub mod clique_tree;
pub mod context;
pub mod factor_table;
pub mod objective;
pub mod potential;
pub mod prior;
pub mod trainer;
pub mod weights;
