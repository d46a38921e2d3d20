//! Shared library surface for the dispatch runtime and tests.

pub mod areas;
pub mod emergency;
pub mod registry;
pub mod simulator;
