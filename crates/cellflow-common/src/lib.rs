pub mod address;
pub mod coord;
pub mod error;
pub mod function;
pub mod range;
pub mod value;

pub use address::{CellKey, SheetKey};
pub use coord::{col_to_letters, letters_to_col, CellAddr, RelAddr};
pub use error::{EngineError, ErrorKind};
pub use function::{ArgKind, ArgSpec};
pub use range::RangeAddr;
pub use value::LiteralValue;
