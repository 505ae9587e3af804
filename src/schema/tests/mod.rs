mod tests_compact_expand;
