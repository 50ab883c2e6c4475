pub mod params;
pub mod repetition;
pub mod sampler;
pub mod select;
pub mod temperature;
pub mod top_k;
pub mod top_p;

pub use params::SamplingParams;
pub use repetition::RepetitionPenaltySampler;
pub use sampler::{Sampler, SamplerChain, TokenLogit};
pub use select::{DistSampler, GreedySampler};
pub use temperature::TemperatureSampler;
pub use top_k::TopKSampler;
pub use top_p::TopPSampler;
