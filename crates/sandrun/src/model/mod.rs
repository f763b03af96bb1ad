pub mod config;
pub mod ids;
pub mod run;

pub use config::*;
pub use ids::RunId;
pub use run::*;
