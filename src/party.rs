//! Party membership ledger and the track coordinator state machine.
//!
//! One round runs Lobby -> Loading -> ReadyWait -> Playing -> Lobby.
//! The lexicographically smallest channel id acts as master and drives
//! the round transitions; everyone else follows the broadcasts.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};
use rand::prelude::*;

use crate::message::{ClientMessage, MemberInfo, PeerMessage};
use crate::singing::{SungNote, Timeline};

/// How often newly committed notes are shipped to the other peers.
pub const NOTE_BROADCAST_INTERVAL_MS: i64 = 66;

/// Fallback track ids are drawn from this range when the playlist is empty.
const RANDOM_TRACK_POOL: u32 = 900;

/// Padding added to the synchronized start so a short delay never causes
/// peers to start in the past.
const START_MARGIN_MS: i64 = 50;

#[derive(Clone, Debug, PartialEq)]
pub struct PartyMember {
    pub nick: String,
    pub colour: String,
    /// Data channel to this peer is open.
    pub data: bool,
    pub ping: Option<i64>,
    pub ready: bool,
    pub me: bool,
    pub loaded: bool,
    pub score: Option<u32>,
    pub part: usize,
}

impl PartyMember {
    fn new(info: &MemberInfo, me: bool) -> Self {
        Self {
            nick: info.nick.clone(),
            colour: info.colour.clone(),
            data: false,
            ping: None,
            ready: false,
            me,
            loaded: false,
            score: None,
            part: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundState {
    Lobby,
    Loading,
    ReadyWait,
    Playing,
}

/// Membership frozen at load start. Only the ids matter for the
/// completion predicate; flag state lives on the main ledger.
struct SessionParty {
    ids: BTreeSet<String>,
    loaded: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PartyEvent {
    /// Some member field changed; re-render the roster.
    Updated,
    /// Start downloading and parsing this track.
    LoadTrack(u32),
    /// The scheduled start time arrived; begin playback now.
    StartGame,
    PlaylistUpdated(Vec<u32>),
    /// A peer sang these notes; feed them to their remote player.
    SangNotes { peer: String, notes: Vec<SungNote>, score: u32 },
}

pub struct Party {
    channel: String,
    ledger: BTreeMap<String, PartyMember>,
    queue: Vec<u32>,
    session_party: Option<SessionParty>,
    state: RoundState,
    pending_start: Option<i64>,
    broadcasts: Vec<PeerMessage>,
    server_outbox: Vec<ClientMessage>,
    events: Vec<PartyEvent>,
}

impl Party {
    /// `channel` is our own id as assigned by the signaling relay.
    pub fn new(channel: &str) -> Self {
        Self {
            channel: channel.into(),
            ledger: BTreeMap::new(),
            queue: Vec::new(),
            session_party: None,
            state: RoundState::Lobby,
            pending_start: None,
            broadcasts: Vec::new(),
            server_outbox: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn members(&self) -> &BTreeMap<String, PartyMember> {
        &self.ledger
    }

    pub fn me(&self) -> Option<&PartyMember> {
        self.ledger.get(&self.channel)
    }

    /// Our position in the sorted roster, for stable lane assignment.
    pub fn member_index(&self) -> Option<usize> {
        self.roster_ids().iter().position(|id| **id == self.channel)
    }

    pub fn queue(&self) -> &[u32] {
        &self.queue
    }

    /// Game messages waiting to be broadcast to every peer.
    pub fn drain_broadcasts(&mut self) -> Vec<PeerMessage> {
        std::mem::take(&mut self.broadcasts)
    }

    /// Messages waiting to be shipped to the signaling relay.
    pub fn drain_server_messages(&mut self) -> Vec<ClientMessage> {
        std::mem::take(&mut self.server_outbox)
    }

    pub fn drain_events(&mut self) -> Vec<PartyEvent> {
        std::mem::take(&mut self.events)
    }

    /// True when we are the elected coordinator for the current round.
    pub fn is_master(&self) -> bool {
        self.roster_ids().first().map(|id| id.as_str()) == Some(self.channel.as_str())
    }

    fn roster_ids(&self) -> Vec<&String> {
        match &self.session_party {
            Some(sp) => sp.ids.iter().collect(),
            None => self.ledger.keys().collect(),
        }
    }

    pub fn handle_member_list(&mut self, members: &BTreeMap<String, MemberInfo>) {
        self.ledger = members
            .iter()
            .map(|(channel, info)| {
                (channel.clone(), PartyMember::new(info, *channel == self.channel))
            })
            .collect();
        self.events.push(PartyEvent::Updated);
    }

    pub fn handle_new_member(&mut self, channel: &str, info: &MemberInfo) {
        let member = PartyMember::new(info, channel == self.channel);
        self.ledger.insert(channel.into(), member);
        self.events.push(PartyEvent::Updated);
    }

    /// Removes a member; mid-load this re-checks whether everyone
    /// remaining has finished, so a leaver can never stall the round.
    pub fn handle_member_left(&mut self, channel: &str, now: i64) {
        self.ledger.remove(channel);
        let mut recheck = false;
        if let Some(sp) = &mut self.session_party {
            sp.ids.remove(channel);
            sp.loaded.remove(channel);
            recheck = self.state == RoundState::Loading;
        }
        if recheck {
            self.handle_track_loaded(None, now);
        }
        self.events.push(PartyEvent::Updated);
    }

    /// The data channel to `peer` opened. The caller should follow up
    /// with a latency probe and report the result via [`handle_latency`].
    ///
    /// [`handle_latency`]: Party::handle_latency
    pub fn handle_channel_established(&mut self, peer: &str) {
        if let Some(member) = self.ledger.get_mut(peer) {
            member.data = true;
            self.events.push(PartyEvent::Updated);
        } else {
            warn!("channel opened to unknown member {}", peer);
        }
    }

    pub fn handle_latency(&mut self, peer: &str, ms: i64) {
        if let Some(member) = self.ledger.get_mut(peer) {
            member.ping = Some(ms);
            self.events.push(PartyEvent::Updated);
        }
    }

    /// The data channel to `peer` failed. The peer also drops out of the
    /// current round's completion predicate, so a dead connection never
    /// stalls everyone else.
    pub fn handle_connection_lost(&mut self, peer: &str, now: i64) {
        if let Some(member) = self.ledger.get_mut(peer) {
            member.data = false;
            member.ping = None;
            self.events.push(PartyEvent::Updated);
        }
        let mut recheck = false;
        if let Some(sp) = &mut self.session_party {
            sp.ids.remove(peer);
            sp.loaded.remove(peer);
            recheck = self.state == RoundState::Loading;
        }
        if recheck {
            self.handle_track_loaded(None, now);
        }
    }

    pub fn handle_playlist(&mut self, songs: Vec<u32>) {
        self.queue = songs.clone();
        self.events.push(PartyEvent::PlaylistUpdated(songs));
    }

    pub fn add_to_playlist(&mut self, song: u32) {
        self.server_outbox.push(ClientMessage::AddToQueue { song });
    }

    /// Dispatches one game message received from `peer`.
    pub fn handle_peer_message(&mut self, peer: &str, message: PeerMessage, now: i64) {
        match message {
            PeerMessage::ReadyToGo { part } => self.handle_ready(peer, part),
            PeerMessage::LoadTrack { track } => self.handle_load_track(track),
            PeerMessage::TrackLoaded => self.handle_track_loaded(Some(peer), now),
            PeerMessage::StartGame { time } => self.handle_start_game(time, now),
            PeerMessage::SangNotes { notes, score } => {
                if let Some(member) = self.ledger.get_mut(peer) {
                    member.score = Some(score);
                } else {
                    warn!("notes from departed member {}", peer);
                    return;
                }
                self.events.push(PartyEvent::SangNotes {
                    peer: peer.into(),
                    notes,
                    score,
                });
                self.events.push(PartyEvent::Updated);
            }
            PeerMessage::Ping { .. } | PeerMessage::Pong { .. } => {
                debug!("transport-level message from {} reached the party", peer);
            }
        }
    }

    /// Marks the local user ready to sing `part` and tells the peers.
    pub fn set_ready(&mut self, part: usize) {
        self.broadcasts.push(PeerMessage::ReadyToGo { part });
        let channel = self.channel.clone();
        self.handle_ready(&channel, part);
    }

    fn handle_ready(&mut self, peer: &str, part: usize) {
        let Some(member) = self.ledger.get_mut(peer) else {
            warn!("ready message from departed member {}", peer);
            return;
        };
        member.ready = true;
        member.part = part;
        self.events.push(PartyEvent::Updated);

        if self.state != RoundState::Lobby {
            warn!("got ready message but a round is in progress");
            return;
        }
        let pending = self.ledger.values().filter(|m| !m.ready).count();
        if pending == 0 {
            if self.is_master() {
                info!("everyone is ready, picking a track");
                self.broadcast_track();
            } else {
                info!("everyone is ready, waiting for the master");
            }
        } else {
            info!("{} left to confirm", pending);
        }
    }

    fn broadcast_track(&mut self) {
        let track = match self.queue.first() {
            Some(&song) => song,
            None => thread_rng().gen_range(0..RANDOM_TRACK_POOL),
        };
        self.broadcasts.push(PeerMessage::LoadTrack { track });
        self.server_outbox.push(ClientMessage::RemoveFromQueue { song: track });
        self.handle_load_track(track);
    }

    fn handle_load_track(&mut self, track: u32) {
        if self.state != RoundState::Lobby {
            warn!("got load track command but a round is in progress");
            return;
        }
        self.state = RoundState::Loading;
        for member in self.ledger.values_mut() {
            member.loaded = false;
        }
        self.session_party = Some(SessionParty {
            ids: self.ledger.keys().cloned().collect(),
            loaded: BTreeSet::new(),
        });
        self.events.push(PartyEvent::Updated);
        self.events.push(PartyEvent::LoadTrack(track));
    }

    /// The local track finished loading; announce it and re-check the
    /// completion predicate.
    pub fn track_did_load(&mut self, now: i64) {
        self.broadcasts.push(PeerMessage::TrackLoaded);
        let channel = self.channel.clone();
        self.handle_track_loaded(Some(&channel), now);
    }

    fn handle_track_loaded(&mut self, peer: Option<&str>, now: i64) {
        let pending = {
            let Some(sp) = &mut self.session_party else {
                warn!("track loaded report outside a round");
                return;
            };
            if let Some(peer) = peer {
                if !sp.ids.contains(peer) {
                    warn!("loaded report from {} who is not in this round", peer);
                    return;
                }
                sp.loaded.insert(peer.into());
            }
            sp.ids.difference(&sp.loaded).count()
        };
        if let Some(peer) = peer {
            if let Some(member) = self.ledger.get_mut(peer) {
                member.loaded = true;
            }
            self.events.push(PartyEvent::Updated);
        }
        if pending == 0 {
            if self.is_master() {
                info!("everyone has the track, scheduling the start");
                self.start_game(now);
            } else {
                info!("everyone has the track, waiting for the master");
            }
        } else {
            info!("{} left to finish downloading", pending);
        }
    }

    fn start_game(&mut self, now: i64) {
        let ids: Vec<String> = match &self.session_party {
            Some(sp) => sp.ids.iter().cloned().collect(),
            None => return,
        };
        // a one-way trip is half the worst round-trip; pad it by half
        // again plus a fixed margin
        let max_ping = ids
            .iter()
            .filter_map(|id| self.ledger.get(id).and_then(|m| m.ping))
            .max()
            .unwrap_or(0);
        let time = now + max_ping * 3 / 4 + START_MARGIN_MS;
        self.broadcasts.push(PeerMessage::StartGame { time });
        self.handle_start_game(time, now);
    }

    fn handle_start_game(&mut self, time: i64, now: i64) {
        if self.state != RoundState::Loading {
            warn!("got start command in state {:?}", self.state);
            return;
        }
        info!("game start in {}ms", time - now);
        self.state = RoundState::ReadyWait;
        self.pending_start = Some(time);
        if let Some(sp) = &self.session_party {
            for id in &sp.ids {
                if let Some(member) = self.ledger.get_mut(id) {
                    member.ready = false;
                    member.loaded = false;
                }
            }
        }
        self.events.push(PartyEvent::Updated);
    }

    /// Fires the scheduled start once the synchronized clock reaches it.
    pub fn tick(&mut self, now: i64) {
        if let Some(time) = self.pending_start {
            if now >= time {
                self.pending_start = None;
                self.state = RoundState::Playing;
                self.events.push(PartyEvent::StartGame);
            }
        }
    }

    /// Playback finished; the party returns to the lobby.
    pub fn track_ended(&mut self) {
        self.state = RoundState::Lobby;
        self.session_party = None;
        self.pending_start = None;
        self.events.push(PartyEvent::Updated);
    }
}

/// Periodically gathers notes committed since the last transmission.
pub struct NoteBroadcaster {
    last_beat: i32,
    next_due: i64,
}

impl NoteBroadcaster {
    pub fn new() -> Self {
        Self {
            last_beat: -1,
            next_due: 0,
        }
    }

    pub fn reset(&mut self) {
        self.last_beat = -1;
        self.next_due = 0;
    }

    /// Returns the next batch to broadcast, if the interval has elapsed
    /// and anything new was sung.
    pub fn poll(&mut self, now: i64, timeline: &Timeline, score: u32) -> Option<PeerMessage> {
        if now < self.next_due {
            return None;
        }
        self.next_due = now + NOTE_BROADCAST_INTERVAL_MS;
        let notes = timeline.notes_in_range(self.last_beat + 1, i32::MAX);
        if notes.is_empty() {
            return None;
        }
        self.last_beat = notes[notes.len() - 1].time;
        Some(PeerMessage::SangNotes {
            notes: notes.to_vec(),
            score,
        })
    }
}

impl Default for NoteBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
