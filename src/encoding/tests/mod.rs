mod tests_fixed;
mod tests_slices;
