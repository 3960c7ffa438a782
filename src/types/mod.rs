/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Inert newtypes and cryptographic primitives shared by every subsystem.

pub mod basic;

pub mod crypto_primitives;
