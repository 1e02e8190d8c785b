use thiserror::Error;

/// Every failure the registry reports to its host.
///
/// The set is closed: hosts branch on [`Error::code`] and nothing else.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error
{
        #[error("unknown error: {0}")]
        Unknown(String),

        #[error("invalid instance handle {0}")]
        InvalidHandle(u32),

        #[error("registry is not initialized")]
        NotInitialized,

        #[error("registry is already initialized")]
        AlreadyInitialized,

        #[error("unsupported graphics api {0}")]
        UnsupportedGraphicsApi(i32),

        #[error("graphics device creation failed: {0}")]
        DeviceCreationFailed(String),

        #[error("texture creation failed: {0}")]
        TextureCreationFailed(String),

        #[error("resource barrier failed: {0}")]
        ResourceBarrierFailed(String),

        #[error("web view creation failed: {0}")]
        WebViewCreationFailed(String),

        #[error("composition failed: {0}")]
        CompositionFailed(String),

        #[error("navigation failed: {0}")]
        NavigationFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error
{
        pub const SUCCESS: i32 = 0;

        /// Stable integer code used across the C ABI.
        pub fn code(&self) -> i32
        {
                match self
                {
                        Error::Unknown(_) => -1,
                        Error::InvalidHandle(_) => -2,
                        Error::NotInitialized => -3,
                        Error::AlreadyInitialized => -4,
                        Error::UnsupportedGraphicsApi(_) => -100,
                        Error::DeviceCreationFailed(_) => -101,
                        Error::TextureCreationFailed(_) => -102,
                        Error::ResourceBarrierFailed(_) => -103,
                        Error::WebViewCreationFailed(_) => -200,
                        Error::CompositionFailed(_) => -201,
                        Error::NavigationFailed(_) => -202,
                }
        }

        /// Collapses a result into an ABI code.
        pub fn code_of<T>(result: &Result<T>) -> i32
        {
                match result
                {
                        Ok(_) => Self::SUCCESS,
                        Err(e) => e.code(),
                }
        }
}
