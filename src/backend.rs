// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Providers of codec devices.
//!
//! A backend is a provider of [`CodecDevice`](crate::device::CodecDevice)
//! implementations. Hardware integrations live with the embedder; this crate
//! only ships the software dummy used by tests and demos.

pub mod dummy;
