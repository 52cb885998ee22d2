#[cfg(unix)]
mod emulator_lifecycle_test;
mod external_emulator_test;
mod schema_cache_test;
