pub mod import;
pub mod provider;
pub mod recommender;
pub mod sampler;

pub use provider::Provider;
pub use recommender::{
    AlgDesc, AlgKind, Evaluator, EvaluatorRegistry, ItemMeanFactory, ItemMeanRecommender,
    RecommendParam, Recommender, RecommenderFactory, recommender_factory,
};
pub use sampler::DatasetSampler;
