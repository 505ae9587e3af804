mod helpers;

mod tests_eviction;
mod tests_open_recovery;
mod tests_put_get;
