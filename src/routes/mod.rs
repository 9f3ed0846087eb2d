/// Router Module Index
///
/// Fixed endpoints live here. Everything else falls through to the CMS
/// request router via `handlers::dispatch`.

/// Unauthenticated operational endpoints.
pub mod public;
