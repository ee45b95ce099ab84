// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The classifier and dispatcher.
//!
//! Every frame crossing between the network stack and the engine
//! passes through an [`Engine`]. On receive, [`Engine::rx()`] reads
//! the classification tag and routes the frame to steering, fan-out
//! or keepalive reconstruction, or lets it continue to the stack. On
//! transmit, [`Engine::tx()`] is where flows get bound: the frame
//! carries every rewrite the stack applied, which is exactly what the
//! flow entry needs.
use super::bind;
use super::bind::Egress;
use super::ether::ETHER_HDR_SZ;
use super::flow_table::FoeHw;
use super::flow_table::FoeTable;
use super::frame::FoeMagic;
use super::frame::Frame;
use super::frame::MIN_FRAME_LEN;
use super::frame::PktType;
use super::ifdir::DeviceResolver;
use super::ifdir::InterfaceDirectory;
use super::keepalive;
use super::reason::ActiveReason;
use super::reason::ReasonClass;
use super::reason::ReasonCode;
use super::steer;
use super::steer::SteerResult;
use alloc::sync::Arc;
use core::marker::PhantomData;
use ppe_api::DumpFoeResp;
use ppe_api::FoeState;
use ppe_api::Generation;
use ppe_api::PpeConfig;
use ppe_api::PpeError;

/// What to do with a received frame.
#[derive(Debug)]
pub enum RxAction {
    /// Hand the frame to the network stack.
    Continue(Frame),
    /// The frame was forwarded or freed.
    Consumed,
}

impl RxAction {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Continue(_) => "continue",
            Self::Consumed => "consumed",
        }
    }
}

impl From<SteerResult> for RxAction {
    fn from(res: SteerResult) -> Self {
        match res {
            SteerResult::Pass(frame) => Self::Continue(frame),
            SteerResult::Consumed => Self::Consumed,
        }
    }
}

/// What to do with a frame on its way out.
#[derive(Debug)]
pub enum TxAction {
    /// Transmit the frame.
    Continue(Frame),
    /// The frame was freed.
    Consumed,
}

impl TxAction {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Continue(_) => "continue",
            Self::Consumed => "consumed",
        }
    }
}

#[allow(unused_variables)]
fn rx_dispatch_probe(idx: u32, reason: u8, action: &RxAction) {
    cfg_if! {
        if #[cfg(feature = "usdt")] {
            crate::ppe_provider::rx__dispatch!(
                || (idx, reason, action.as_str())
            );
        } else {
            let _ = (idx, reason, action);
        }
    }
}

#[allow(unused_variables)]
fn tx_dispatch_probe(idx: u32, reason: u8, action: &TxAction) {
    cfg_if! {
        if #[cfg(feature = "usdt")] {
            crate::ppe_provider::tx__dispatch!(
                || (idx, reason, action.as_str())
            );
        } else {
            let _ = (idx, reason, action);
        }
    }
}

/// One running engine: its configuration, flow table and interface
/// directory.
///
/// `R` is the reason-code vocabulary of the engine generation; it must
/// agree with the configured chip.
pub struct Engine<R: ReasonCode = ActiveReason> {
    cfg: PpeConfig,
    table: FoeTable,
    dir: InterfaceDirectory,
    _reason: PhantomData<R>,
}

impl<R: ReasonCode> core::fmt::Debug for Engine<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("cfg", &self.cfg)
            .field("table", &self.table)
            .finish()
    }
}

impl<R: ReasonCode> Engine<R> {
    pub fn new(cfg: PpeConfig, hw: Arc<dyn FoeHw>) -> Result<Self, PpeError> {
        cfg.validate()?;

        if cfg.generation() != R::GENERATION {
            return Err(PpeError::BadConfig(format!(
                "{} is a {:?} engine, built for {:?}",
                cfg.chip,
                cfg.generation(),
                R::GENERATION,
            )));
        }

        let table = FoeTable::new(cfg.table_size, hw)?;

        Ok(Self {
            cfg,
            table,
            dir: InterfaceDirectory::new(),
            _reason: PhantomData,
        })
    }

    /// Clear the flow table and resolve the interface directory.
    pub fn start<D: DeviceResolver + ?Sized>(&self, resolver: &D) {
        self.table.reset();
        let found = self.dir.populate(resolver);
        super::dbg!("engine: started with {} interfaces", found);
    }

    /// Drop every interface reference.
    pub fn stop(&self) {
        self.dir.release_all();
    }

    pub fn cfg(&self) -> &PpeConfig {
        &self.cfg
    }

    pub fn table(&self) -> &FoeTable {
        &self.table
    }

    pub fn dir(&self) -> &InterfaceDirectory {
        &self.dir
    }

    pub fn dump(&self) -> DumpFoeResp {
        self.table.dump()
    }

    /// Dispatch a frame received from a GMAC or a pseudo-interface.
    pub fn rx(&self, frame: Frame) -> RxAction {
        let tag = *frame.tag();
        let action = self.rx_inner(frame);
        rx_dispatch_probe(tag.entry, tag.reason, &action);
        action
    }

    fn rx_inner(&self, mut frame: Frame) -> RxAction {
        let cfg = &self.cfg;

        if frame.len() < MIN_FRAME_LEN
            || frame.dst_mac().is_none_or(|mac| mac.is_broadcast())
        {
            return RxAction::Continue(frame);
        }

        let mcast_ok =
            cfg.generation() == Generation::V2 && cfg.mcast_offload;
        if frame.pkt_type() == PktType::Multicast && !mcast_ok {
            return RxAction::Continue(frame);
        }

        let tag = *frame.tag();

        match tag.magic {
            FoeMagic::ExtIf => {
                if !cfg.wifi_offload {
                    return RxAction::Continue(frame);
                }
                return steer::outbound(&self.dir, cfg, frame).into();
            }

            FoeMagic::Gmac => {}
            FoeMagic::None | FoeMagic::Ppe => return RxAction::Continue(frame),
        }

        let reason = R::from(tag.reason);
        let class = reason.class();

        if class == ReasonClass::BindForceToCpu {
            return match self.table.peek(tag.entry) {
                Ok(entry) => {
                    steer::force_to_cpu(&self.dir, cfg, &entry, frame).into()
                }
                Err(e) => {
                    super::err!("rx: force-to-cpu flow {}: {}", tag.entry, e);
                    RxAction::Continue(frame)
                }
            };
        }

        let is_keepalive = matches!(
            class,
            ReasonClass::BindKeepalive
                | ReasonClass::KeepaliveUcOldHdr
                | ReasonClass::KeepaliveMcNewHdr
                | ReasonClass::KeepaliveDupOldHdr
        );

        if !is_keepalive && reason.is_loopback(cfg.chip, tag.sport) {
            if !cfg.wifi_offload {
                return RxAction::Continue(frame);
            }
            return RxAction::Continue(steer::inbound(&self.dir, cfg, frame));
        }

        match class {
            ReasonClass::MulticastToCpu | ReasonClass::MulticastToGmacCpu => {
                steer::fan_out(&self.dir, frame).into()
            }

            // The hardware keepalive mode takes care of these.
            ReasonClass::KeepaliveUcOldHdr => RxAction::Continue(frame),

            ReasonClass::KeepaliveMcNewHdr | ReasonClass::BindKeepalive => {
                keepalive::reconstruct(&self.table, cfg, &mut frame, true);
                RxAction::Continue(frame)
            }

            ReasonClass::KeepaliveDupOldHdr => {
                keepalive::reconstruct(&self.table, cfg, &mut frame, false);
                RxAction::Continue(frame)
            }

            _ => RxAction::Continue(frame),
        }
    }

    /// Dispatch a frame the stack is transmitting through `egress`,
    /// binding its flow if hardware asked for it.
    pub fn tx(&self, frame: Frame, egress: Egress) -> TxAction {
        let tag = *frame.tag();
        let action = self.tx_inner(frame, egress);
        tx_dispatch_probe(tag.entry, tag.reason, &action);
        action
    }

    fn tx_inner(&self, mut frame: Frame, egress: Egress) -> TxAction {
        let cfg = &self.cfg;

        if egress == Egress::ExtIf && !cfg.wifi_offload {
            return TxAction::Continue(frame);
        }

        let tag = *frame.tag();
        if frame.len() < ETHER_HDR_SZ || tag.magic != FoeMagic::Gmac {
            return TxAction::Continue(frame);
        }

        let reason = R::from(tag.reason);
        let class = reason.class();
        let idx = tag.entry;

        if class == ReasonClass::Unhit {
            return TxAction::Continue(frame);
        }

        if !tag.alg && self.should_bind(class, idx) {
            let res = bind::bind(
                &mut self.table.lock(),
                idx,
                &frame,
                egress,
                cfg,
                &self.dir,
            );

            // Keep the rest of the software path from trying again.
            if res.is_err() && egress != Egress::ExtIf {
                frame.tag_mut().reason = R::UNHIT.into();
            }

            return TxAction::Continue(frame);
        }

        match class {
            ReasonClass::KeepaliveMcNewHdr
            | ReasonClass::KeepaliveDupOldHdr
            | ReasonClass::BindKeepalive => TxAction::Consumed,

            ReasonClass::PreBind => {
                self.promote(idx);
                TxAction::Continue(frame)
            }

            _ => TxAction::Continue(frame),
        }
    }

    fn should_bind(&self, class: ReasonClass, idx: u32) -> bool {
        if class == ReasonClass::UnbindRateReach {
            return true;
        }

        // The first generation never reports a rate for IPv6 routes.
        cfg!(feature = "ipv6")
            && self.cfg.generation() == Generation::V1
            && class == ReasonClass::Unbind
            && self.table.peek(idx).is_ok_and(|e| e.is_ipv6_grp())
    }

    /// Move a pre-bound entry to BIND.
    fn promote(&self, idx: u32) {
        let mut guard = self.table.lock();
        let Ok(mut entry) = guard.read(idx) else {
            return;
        };

        if !entry.ib1.preb {
            return;
        }

        entry.ib1.preb = false;
        entry.ib1.state = FoeState::Bind;
        entry.ib1.ts = guard.timestamp();
        if let Err(e) = guard.publish(idx, &entry) {
            super::err!("tx: pre-bind promotion of flow {} failed: {}", idx, e);
        }
    }
}
