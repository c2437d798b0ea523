// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod inspect;
pub mod keygen;
pub mod replay;
pub mod timeline;
pub mod verify;
