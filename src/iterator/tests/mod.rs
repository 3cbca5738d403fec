mod tests_merging;
