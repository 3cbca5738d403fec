pub mod helpers;
mod tests_batch_write;
mod tests_compaction;
mod tests_concurrency;
