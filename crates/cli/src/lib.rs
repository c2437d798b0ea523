// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Forensic tooling over tickvault replay files.

pub mod commands;
pub mod scan;
