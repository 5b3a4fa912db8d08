pub mod ip;
pub mod time_parser;
pub mod url;
