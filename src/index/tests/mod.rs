mod tests_bounds;
