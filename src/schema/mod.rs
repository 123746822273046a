pub mod arrow;
pub mod types;

pub use self::arrow::{build_arrow_schema, categorical_type, map_to_arrow_type, SOURCE_FILE_COLUMN};
pub use self::types::ColumnType;
