pub mod code_cache;
pub mod db_utils;
pub mod response;
pub mod username_filter;
