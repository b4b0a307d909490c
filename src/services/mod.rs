pub mod file;
pub mod ownership;
pub mod secrets;
pub mod signer;

pub use file::*;
pub use ownership::*;
pub use secrets::*;
pub use signer::*;
