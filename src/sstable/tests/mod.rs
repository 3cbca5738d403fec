pub mod helpers;
mod tests_build_read;
