//! Cross-point routing transactions (§9 design note: "encapsulate every
//! read-modify-write of the routing matrix as an explicit transaction
//! value — build the desired edge set, apply atomically, never interleave
//! with DMA").

use std::fmt;

/// One end of a cross-point connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrosspointNode {
    /// A channel's frame-buffer output (source for playout, or a
    /// capture-side framebuffer feeding a downstream mux).
    FrameBuffer(u8),
    /// A physical SDI input, 1-8.
    SdiInput(u8),
    /// A physical SDI output, 1-8.
    SdiOutput(u8),
    /// The second data stream of a 3G-SDI link (GLOSSARY "DS2"), used for
    /// 1080p HFR.
    Ds2(u8),
    /// A quad-link TSI/SQD multiplexer stage, numbered per SDK convention.
    Mux(u8),
}

/// A single directed cross-point edge: `src` feeds `dst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CrosspointEdge {
    pub src: CrosspointNode,
    pub dst: CrosspointNode,
}

impl fmt::Display for CrosspointEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} -> {:?}", self.src, self.dst)
    }
}

/// A routing transaction: the full set of edges this channel (and its quad
/// siblings, if any) require, built up before being applied under the
/// global setup mutex.
///
/// Applying a transaction must never interleave with a DMA transfer or a
/// vertical-interrupt wait (§4.1, §9).
#[derive(Debug, Clone, Default)]
pub struct RoutingTransaction {
    /// Edges to add.
    pub add: Vec<CrosspointEdge>,
    /// Edges to remove (identified by destination, since a destination has
    /// at most one source).
    pub clear_destinations: Vec<CrosspointNode>,
}

impl RoutingTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&mut self, src: CrosspointNode, dst: CrosspointNode) -> &mut Self {
        self.add.push(CrosspointEdge { src, dst });
        self
    }

    pub fn clear(&mut self, dst: CrosspointNode) -> &mut Self {
        self.clear_destinations.push(dst);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.clear_destinations.is_empty()
    }
}

/// Builds the capture-side routing transaction for a single-link channel
/// (§4.5.2 step 7, plain case): one SDI input feeds one frame-buffer.
pub fn single_link_capture(channel: u8, sdi_input: u8) -> RoutingTransaction {
    let mut txn = RoutingTransaction::new();
    let fb = CrosspointNode::FrameBuffer(channel);
    txn.clear(fb);
    txn.add_edge(CrosspointNode::SdiInput(sdi_input), fb);
    txn
}

/// Builds the capture-side routing transaction for quad-link square
/// division (SQD): four SDI inputs each feed one quadrant frame-buffer in
/// the quad group starting at `base_channel` (§4.5.2 step 7).
pub fn quad_sqd_capture(base_channel: u8, base_sdi_input: u8) -> RoutingTransaction {
    let mut txn = RoutingTransaction::new();
    for i in 0..4 {
        let fb = CrosspointNode::FrameBuffer(base_channel + i);
        txn.clear(fb);
        txn.add_edge(CrosspointNode::SdiInput(base_sdi_input + i), fb);
    }
    txn
}

/// Builds the capture-side routing transaction for quad-link two-sample
/// interleave (TSI): each SDI input first feeds a MUX stage, which then
/// feeds the frame-buffer, plus the DS2 edges used at HFR (§4.5.2 step 7,
/// GLOSSARY "DS2").
pub fn quad_tsi_capture(base_channel: u8, base_sdi_input: u8, hfr: bool) -> RoutingTransaction {
    let mut txn = RoutingTransaction::new();
    for i in 0..4 {
        let fb = CrosspointNode::FrameBuffer(base_channel + i);
        let mux = CrosspointNode::Mux(i);
        txn.clear(fb);
        txn.clear(mux);
        txn.add_edge(CrosspointNode::SdiInput(base_sdi_input + i), mux);
        txn.add_edge(mux, fb);
        if hfr {
            txn.add_edge(CrosspointNode::Ds2(base_sdi_input + i), mux);
        }
    }
    txn
}

/// Builds the playout-side routing transaction: frame-buffer outputs feed
/// SDI outputs (single-link case), mirroring [`single_link_capture`]
/// (§4.6.1).
pub fn single_link_playout(channel: u8, sdi_output: u8) -> RoutingTransaction {
    let mut txn = RoutingTransaction::new();
    let dst = CrosspointNode::SdiOutput(sdi_output);
    txn.clear(dst);
    txn.add_edge(CrosspointNode::FrameBuffer(channel), dst);
    txn
}

/// Quad-link SQD playout: mirror of [`quad_sqd_capture`] but in the
/// framebuffer-output -> destination-input direction (§4.6.1).
pub fn quad_sqd_playout(base_channel: u8, base_sdi_output: u8) -> RoutingTransaction {
    let mut txn = RoutingTransaction::new();
    for i in 0..4 {
        let dst = CrosspointNode::SdiOutput(base_sdi_output + i);
        txn.clear(dst);
        txn.add_edge(CrosspointNode::FrameBuffer(base_channel + i), dst);
    }
    txn
}

/// Quad-link TSI playout, with the additional DS2/MUX edges for HFR
/// (§4.6.1).
pub fn quad_tsi_playout(base_channel: u8, base_sdi_output: u8, hfr: bool) -> RoutingTransaction {
    let mut txn = RoutingTransaction::new();
    for i in 0..4 {
        let mux = CrosspointNode::Mux(i);
        let dst = CrosspointNode::SdiOutput(base_sdi_output + i);
        txn.clear(mux);
        txn.clear(dst);
        txn.add_edge(CrosspointNode::FrameBuffer(base_channel + i), mux);
        txn.add_edge(mux, dst);
        if hfr {
            txn.add_edge(mux, CrosspointNode::Ds2(base_sdi_output + i));
        }
    }
    txn
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqd_has_four_independent_edges() {
        let txn = quad_sqd_capture(0, 1);
        assert_eq!(txn.add.len(), 4);
        let srcs: Vec<_> = txn.add.iter().map(|e| e.src).collect();
        assert_eq!(
            srcs,
            vec![
                CrosspointNode::SdiInput(1),
                CrosspointNode::SdiInput(2),
                CrosspointNode::SdiInput(3),
                CrosspointNode::SdiInput(4),
            ]
        );
    }

    #[test]
    fn tsi_routes_through_mux_and_adds_ds2_at_hfr() {
        let txn = quad_tsi_capture(0, 1, true);
        // 4 inputs->mux + 4 mux->fb + 4 ds2->mux = 12 edges.
        assert_eq!(txn.add.len(), 12);
        let no_hfr = quad_tsi_capture(0, 1, false);
        assert_eq!(no_hfr.add.len(), 8);
    }

    #[test]
    fn single_link_clears_only_its_own_destination() {
        let txn = single_link_capture(2, 3);
        assert_eq!(txn.clear_destinations, vec![CrosspointNode::FrameBuffer(2)]);
    }
}
