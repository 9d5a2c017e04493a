pub mod add;
pub mod cat;
pub mod init;
pub mod key;
pub mod publish;
pub mod resolve;
pub mod serve;
pub mod version;

pub use add::Add;
pub use cat::Cat;
pub use init::Init;
pub use key::Key;
pub use publish::Publish;
pub use resolve::Resolve;
pub use serve::Serve;
pub use version::Version;
