pub mod arg;
pub mod codec;
pub mod error;
pub mod ids;
pub mod response;

pub use arg::{create_remote_cache_key, encode, parse_remote_arg, stringify_remote_arg, EncodedCall};
pub use codec::{Codec, TypeHook};
pub use error::{RemoteError, DEFAULT_ERROR_STATUS, REDIRECT_STATUS};
pub use ids::{CacheKey, RemoteId};
pub use response::{CommandResult, RemoteFunctionResponse};
