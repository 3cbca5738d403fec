mod tests_std_env;
