//! Data providers, file naming and persistence

pub mod file;
pub mod naming;
pub mod network;
pub mod provider;
pub mod storage;

pub use file::FileProvider;
pub use naming::{data_path, discover, generate_filename, parse_filename, FileFormat, ParsedFileName};
pub use network::NetworkProvider;
pub use provider::{DataError, DataProvider, ErrorKind};
pub use storage::{load_market_data, read_table, write_market_data, SidecarMeta, StoredTable};
