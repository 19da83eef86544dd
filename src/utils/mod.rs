pub mod db_utils;
pub mod response;
pub mod session_guard;
pub mod username_index;
