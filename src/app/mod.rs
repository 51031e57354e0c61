pub mod dispatcher;
pub mod model;
pub mod pipeline;
pub mod progress_store;
pub mod queue;
