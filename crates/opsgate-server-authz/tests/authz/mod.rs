// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod approvals;
mod attributes;
mod audit;
mod hybrid;
mod support;
