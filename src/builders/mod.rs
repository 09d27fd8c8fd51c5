pub mod information_schema;
mod insert;
mod procedure;

pub use insert::InsertStatement;
pub use procedure::ProcedureCall;
