pub mod clientid;
pub mod codec;
pub mod filters;
pub mod message;
pub mod replies;
pub mod validate;
