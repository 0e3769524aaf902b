pub mod distributions;
pub mod error;
pub mod routes;

pub use distributions::ApiState;
pub use error::ApiError;
pub use routes::create_router;
