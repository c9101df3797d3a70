// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

mod caldav_reconcile;
mod connection;
mod push_routing;
mod subscriptions;
mod supervisor;
