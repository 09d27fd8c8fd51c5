mod tiberius;
mod tokio_postgres;

pub use self::in_memory_test::{InMemoryTestDriver, InMemoryTestResponseBuilder, RecordedQuery};
pub use self::tiberius::TiberiusDriver;
pub use self::tokio_postgres::TokioPostgresDriver;
