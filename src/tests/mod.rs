// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod support;

mod controller_tests;
mod fragmentation_tests;
mod recording_tests;
