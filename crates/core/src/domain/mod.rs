pub mod classification;
pub mod conversation;
pub mod evidence;
pub mod invocation;
pub mod response;
