// Protocol core: identifier codec, request building, response parsing, and errors.
pub mod charset;
pub mod error;
pub mod lines;
pub mod namespace;
pub mod request;
pub mod response;
