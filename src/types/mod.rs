// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Canonical model types shared between the adapter and the host.
//!
//! The host core speaks in terms of [`Device`]s carrying [`Channel`]s.
//! Channel values are exchanged as [`ChannelValue`], with colors represented
//! as sRGB [`Color`] and button events as [`ButtonEventCode`].

mod button;
mod channel;
mod color;
mod device;
mod value;

pub use button::ButtonEventCode;
pub use channel::{Channel, ChannelDataType, ChannelFlags, ChannelKind, ChoiceOption};
pub use color::{Color, Hsv};
pub use device::{
    ActionResponse, CmdId, CmdResponse, CmdStatus, ConnectivityStatus, Device, DeviceClass,
    DeviceFlags,
};
pub use value::ChannelValue;
