//! Typed message payloads.
//!
//! A payload is a JSON object carrying `object` and `action` strings plus
//! action-specific fields. [`MessageData`] is the closed set of payloads the
//! server understands; parsing an unknown `(object, action)` pair fails with
//! `invalid_action`.

use crate::error::PopError;
use crate::message::Message;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const OPEN_BALLOT: &str = "OPEN_BALLOT";
pub const SECRET_BALLOT: &str = "SECRET_BALLOT";
pub const PLURALITY: &str = "Plurality";
pub const APPROVAL: &str = "Approval";
pub const FEDERATION_SUCCESS: &str = "success";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaoCreate {
    pub id: String,
    pub name: String,
    pub creation: i64,
    pub organizer: String,
    #[serde(default)]
    pub witnesses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationSignature {
    pub witness: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaoState {
    pub id: String,
    pub name: String,
    pub creation: i64,
    pub last_modified: i64,
    pub organizer: String,
    #[serde(default)]
    pub witnesses: Vec<String>,
    pub modification_id: String,
    #[serde(default)]
    pub modification_signatures: Vec<ModificationSignature>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaoUpdate {
    pub id: String,
    pub name: String,
    pub last_modified: i64,
    #[serde(default)]
    pub witnesses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddress {
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaoGreet {
    pub lao: String,
    pub frontend: String,
    pub address: String,
    pub peers: Vec<PeerAddress>,
}

/// A meeting announced in a LAO. `id` is `hash("M", lao, creation, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingCreate {
    pub id: String,
    pub name: String,
    pub creation: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub start: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingState {
    pub id: String,
    pub name: String,
    pub creation: i64,
    pub last_modified: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub start: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
    pub modification_id: String,
    #[serde(default)]
    pub modification_signatures: Vec<ModificationSignature>,
}

/// A witness signature over `message_id`, sent after the fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageWitness {
    pub message_id: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollCallCreate {
    pub id: String,
    pub name: String,
    pub creation: i64,
    pub proposed_start: i64,
    pub proposed_end: i64,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Payload shared by `roll_call#open` and `roll_call#reopen`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollCallOpen {
    pub update_id: String,
    pub opens: String,
    pub opened_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollCallClose {
    pub update_id: String,
    pub closes: String,
    pub closed_at: i64,
    pub attendees: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionQuestion {
    pub id: String,
    pub question: String,
    pub voting_method: String,
    pub ballot_options: Vec<String>,
    #[serde(default)]
    pub write_in: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionSetup {
    pub id: String,
    pub lao: String,
    pub name: String,
    pub version: String,
    pub created_at: i64,
    pub start_time: i64,
    pub end_time: i64,
    pub questions: Vec<ElectionQuestion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionKey {
    pub election: String,
    pub election_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionOpen {
    pub lao: String,
    pub election: String,
    pub opened_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionEnd {
    pub lao: String,
    pub election: String,
    pub created_at: i64,
    #[serde(default)]
    pub registered_votes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotCount {
    pub ballot_option: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub id: String,
    pub result: Vec<BallotCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionResult {
    pub questions: Vec<QuestionResult>,
}

/// A ballot choice: a plain option index (open ballot) or a base64
/// ciphertext (secret ballot).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VoteChoice {
    Index(i64),
    Encrypted(String),
}

impl VoteChoice {
    /// The string form hashed into the vote id.
    pub fn id_component(&self) -> String {
        match self {
            Self::Index(index) => index.to_string(),
            Self::Encrypted(ciphertext) => ciphertext.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub id: String,
    pub question: String,
    pub vote: VoteChoice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastVote {
    pub lao: String,
    pub election: String,
    pub created_at: i64,
    pub votes: Vec<Vote>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChirpAdd {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChirpDelete {
    pub chirp_id: String,
    pub timestamp: i64,
}

/// Payload of `chirp#notify_add` and `chirp#notify_delete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChirpNotify {
    pub chirp_id: String,
    pub channel: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionAdd {
    pub reaction_codepoint: String,
    pub chirp_id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionDelete {
    pub reaction_id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputScript {
    #[serde(rename = "type")]
    pub kind: String,
    pub pubkey: String,
    pub sig: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub tx_out_hash: String,
    pub tx_out_index: i64,
    pub script: InputScript,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputScript {
    #[serde(rename = "type")]
    pub kind: String,
    pub pubkey_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: i64,
    pub script: OutputScript,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostTransaction {
    pub transaction_id: String,
    pub transaction: Transaction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusKey {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub property: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusElect {
    pub instance_id: String,
    pub created_at: i64,
    pub key: ConsensusKey,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusElectAccept {
    pub instance_id: String,
    pub message_id: String,
    pub accept: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopchaAuthenticate {
    pub client_id: String,
    pub nonce: String,
    pub identifier: String,
    pub identifier_proof: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub response_mode: String,
    pub popcha_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRequest {
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub value: String,
    pub valid_until: i64,
}

/// Payload of `federation#expect` and `federation#init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationLink {
    pub lao_id: String,
    pub server_address: String,
    pub public_key: String,
    pub challenge: Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationResult {
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub public_key: String,
    pub challenge: Message,
}

/// Every payload the server understands, keyed by `(object, action)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageData {
    LaoCreate(LaoCreate),
    LaoState(LaoState),
    LaoUpdate(LaoUpdate),
    LaoGreet(LaoGreet),
    MeetingCreate(MeetingCreate),
    MeetingState(MeetingState),
    MessageWitness(MessageWitness),
    RollCallCreate(RollCallCreate),
    RollCallOpen(RollCallOpen),
    RollCallReopen(RollCallOpen),
    RollCallClose(RollCallClose),
    ElectionSetup(ElectionSetup),
    ElectionKey(ElectionKey),
    ElectionOpen(ElectionOpen),
    ElectionEnd(ElectionEnd),
    ElectionResult(ElectionResult),
    CastVote(CastVote),
    ChirpAdd(ChirpAdd),
    ChirpDelete(ChirpDelete),
    ChirpNotifyAdd(ChirpNotify),
    ChirpNotifyDelete(ChirpNotify),
    ReactionAdd(ReactionAdd),
    ReactionDelete(ReactionDelete),
    PostTransaction(PostTransaction),
    ConsensusElect(ConsensusElect),
    ConsensusElectAccept(ConsensusElectAccept),
    PopchaAuthenticate(PopchaAuthenticate),
    ChallengeRequest(ChallengeRequest),
    Challenge(Challenge),
    FederationExpect(FederationLink),
    FederationInit(FederationLink),
    FederationResult(FederationResult),
}

#[derive(Deserialize)]
struct Header {
    object: String,
    action: String,
}

fn fields<T: DeserializeOwned>(value: Value, object: &str, action: &str) -> Result<T, PopError> {
    serde_json::from_value(value)
        .map_err(|e| PopError::invalid_field(format!("invalid {object}#{action} payload: {e}")))
}

impl MessageData {
    /// Parses a raw JSON payload.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PopError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let header = Header::deserialize(&value)
            .map_err(|e| PopError::invalid_field(format!("missing object/action: {e}")))?;
        let (object, action) = (header.object.as_str(), header.action.as_str());

        let data = match (object, action) {
            ("lao", "create") => Self::LaoCreate(fields(value, object, action)?),
            ("lao", "state") => Self::LaoState(fields(value, object, action)?),
            ("lao", "update_properties") => Self::LaoUpdate(fields(value, object, action)?),
            ("lao", "greet") => Self::LaoGreet(fields(value, object, action)?),
            ("meeting", "create") => Self::MeetingCreate(fields(value, object, action)?),
            ("meeting", "state") => Self::MeetingState(fields(value, object, action)?),
            ("message", "witness") => Self::MessageWitness(fields(value, object, action)?),
            ("roll_call", "create") => Self::RollCallCreate(fields(value, object, action)?),
            ("roll_call", "open") => Self::RollCallOpen(fields(value, object, action)?),
            ("roll_call", "reopen") => Self::RollCallReopen(fields(value, object, action)?),
            ("roll_call", "close") => Self::RollCallClose(fields(value, object, action)?),
            ("election", "setup") => Self::ElectionSetup(fields(value, object, action)?),
            ("election", "key") => Self::ElectionKey(fields(value, object, action)?),
            ("election", "open") => Self::ElectionOpen(fields(value, object, action)?),
            ("election", "end") => Self::ElectionEnd(fields(value, object, action)?),
            ("election", "result") => Self::ElectionResult(fields(value, object, action)?),
            ("election", "cast_vote") => Self::CastVote(fields(value, object, action)?),
            ("chirp", "add") => Self::ChirpAdd(fields(value, object, action)?),
            ("chirp", "delete") => Self::ChirpDelete(fields(value, object, action)?),
            ("chirp", "notify_add") => Self::ChirpNotifyAdd(fields(value, object, action)?),
            ("chirp", "notify_delete") => Self::ChirpNotifyDelete(fields(value, object, action)?),
            ("reaction", "add") => Self::ReactionAdd(fields(value, object, action)?),
            ("reaction", "delete") => Self::ReactionDelete(fields(value, object, action)?),
            ("coin", "post_transaction") => Self::PostTransaction(fields(value, object, action)?),
            ("consensus", "elect") => Self::ConsensusElect(fields(value, object, action)?),
            ("consensus", "elect_accept") => {
                Self::ConsensusElectAccept(fields(value, object, action)?)
            }
            ("popcha", "authenticate") => Self::PopchaAuthenticate(fields(value, object, action)?),
            ("federation", "challenge_request") => {
                Self::ChallengeRequest(fields(value, object, action)?)
            }
            ("federation", "challenge") => Self::Challenge(fields(value, object, action)?),
            ("federation", "expect") => Self::FederationExpect(fields(value, object, action)?),
            ("federation", "init") => Self::FederationInit(fields(value, object, action)?),
            ("federation", "result") => Self::FederationResult(fields(value, object, action)?),
            _ => {
                return Err(PopError::invalid_action(format!(
                    "unknown action {object}#{action}"
                )))
            }
        };
        Ok(data)
    }

    /// The `(object, action)` pair of this payload.
    pub fn object_action(&self) -> (&'static str, &'static str) {
        match self {
            Self::LaoCreate(_) => ("lao", "create"),
            Self::LaoState(_) => ("lao", "state"),
            Self::LaoUpdate(_) => ("lao", "update_properties"),
            Self::LaoGreet(_) => ("lao", "greet"),
            Self::MeetingCreate(_) => ("meeting", "create"),
            Self::MeetingState(_) => ("meeting", "state"),
            Self::MessageWitness(_) => ("message", "witness"),
            Self::RollCallCreate(_) => ("roll_call", "create"),
            Self::RollCallOpen(_) => ("roll_call", "open"),
            Self::RollCallReopen(_) => ("roll_call", "reopen"),
            Self::RollCallClose(_) => ("roll_call", "close"),
            Self::ElectionSetup(_) => ("election", "setup"),
            Self::ElectionKey(_) => ("election", "key"),
            Self::ElectionOpen(_) => ("election", "open"),
            Self::ElectionEnd(_) => ("election", "end"),
            Self::ElectionResult(_) => ("election", "result"),
            Self::CastVote(_) => ("election", "cast_vote"),
            Self::ChirpAdd(_) => ("chirp", "add"),
            Self::ChirpDelete(_) => ("chirp", "delete"),
            Self::ChirpNotifyAdd(_) => ("chirp", "notify_add"),
            Self::ChirpNotifyDelete(_) => ("chirp", "notify_delete"),
            Self::ReactionAdd(_) => ("reaction", "add"),
            Self::ReactionDelete(_) => ("reaction", "delete"),
            Self::PostTransaction(_) => ("coin", "post_transaction"),
            Self::ConsensusElect(_) => ("consensus", "elect"),
            Self::ConsensusElectAccept(_) => ("consensus", "elect_accept"),
            Self::PopchaAuthenticate(_) => ("popcha", "authenticate"),
            Self::ChallengeRequest(_) => ("federation", "challenge_request"),
            Self::Challenge(_) => ("federation", "challenge"),
            Self::FederationExpect(_) => ("federation", "expect"),
            Self::FederationInit(_) => ("federation", "init"),
            Self::FederationResult(_) => ("federation", "result"),
        }
    }

    fn fields_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::LaoCreate(d) => serde_json::to_value(d),
            Self::LaoState(d) => serde_json::to_value(d),
            Self::LaoUpdate(d) => serde_json::to_value(d),
            Self::LaoGreet(d) => serde_json::to_value(d),
            Self::MeetingCreate(d) => serde_json::to_value(d),
            Self::MeetingState(d) => serde_json::to_value(d),
            Self::MessageWitness(d) => serde_json::to_value(d),
            Self::RollCallCreate(d) => serde_json::to_value(d),
            Self::RollCallOpen(d) | Self::RollCallReopen(d) => serde_json::to_value(d),
            Self::RollCallClose(d) => serde_json::to_value(d),
            Self::ElectionSetup(d) => serde_json::to_value(d),
            Self::ElectionKey(d) => serde_json::to_value(d),
            Self::ElectionOpen(d) => serde_json::to_value(d),
            Self::ElectionEnd(d) => serde_json::to_value(d),
            Self::ElectionResult(d) => serde_json::to_value(d),
            Self::CastVote(d) => serde_json::to_value(d),
            Self::ChirpAdd(d) => serde_json::to_value(d),
            Self::ChirpDelete(d) => serde_json::to_value(d),
            Self::ChirpNotifyAdd(d) | Self::ChirpNotifyDelete(d) => serde_json::to_value(d),
            Self::ReactionAdd(d) => serde_json::to_value(d),
            Self::ReactionDelete(d) => serde_json::to_value(d),
            Self::PostTransaction(d) => serde_json::to_value(d),
            Self::ConsensusElect(d) => serde_json::to_value(d),
            Self::ConsensusElectAccept(d) => serde_json::to_value(d),
            Self::PopchaAuthenticate(d) => serde_json::to_value(d),
            Self::ChallengeRequest(d) => serde_json::to_value(d),
            Self::Challenge(d) => serde_json::to_value(d),
            Self::FederationExpect(d) | Self::FederationInit(d) => serde_json::to_value(d),
            Self::FederationResult(d) => serde_json::to_value(d),
        }
    }

    /// Serializes the payload to JSON, including `object` and `action`.
    pub fn to_json(&self) -> Result<Value, PopError> {
        let (object, action) = self.object_action();
        let mut value = self.fields_value().map_err(PopError::internal)?;
        if let Value::Object(map) = &mut value {
            map.insert("object".to_string(), Value::from(object));
            map.insert("action".to_string(), Value::from(action));
        }
        Ok(value)
    }

    /// Serializes the payload to the bytes that get signed and base64-encoded.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PopError> {
        serde_json::to_vec(&self.to_json()?).map_err(PopError::internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use serde_json::json;

    #[test]
    fn parses_lao_create() {
        let raw = json!({
            "object": "lao",
            "action": "create",
            "id": "abc",
            "name": "LAO",
            "creation": 1_700_000_000,
            "organizer": "org",
            "witnesses": []
        });
        let data = MessageData::from_slice(raw.to_string().as_bytes()).expect("should parse");
        match data {
            MessageData::LaoCreate(create) => {
                assert_eq!(create.name, "LAO");
                assert_eq!(create.creation, 1_700_000_000);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn unknown_pair_is_invalid_action() {
        let raw = json!({"object": "meeting", "action": "cancel"});
        let err = MessageData::from_slice(raw.to_string().as_bytes()).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::InvalidAction);
    }

    #[test]
    fn missing_fields_are_invalid_field() {
        let raw = json!({"object": "roll_call", "action": "open", "opens": "x"});
        let err = MessageData::from_slice(raw.to_string().as_bytes()).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::InvalidMessageField);

        let err = MessageData::from_slice(b"[1,2]").expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::InvalidMessageField);
    }

    #[test]
    fn vote_choice_accepts_index_and_ciphertext() {
        let open: Vote = serde_json::from_value(json!({"id": "v", "question": "q", "vote": 2}))
            .expect("should parse");
        assert_eq!(open.vote, VoteChoice::Index(2));
        assert_eq!(open.vote.id_component(), "2");

        let secret: Vote =
            serde_json::from_value(json!({"id": "v", "question": "q", "vote": "AAAA"}))
                .expect("should parse");
        assert_eq!(secret.vote, VoteChoice::Encrypted("AAAA".to_string()));
    }

    #[test]
    fn to_json_carries_object_and_action() {
        let data = MessageData::Challenge(Challenge {
            value: "ff".to_string(),
            valid_until: 10,
        });
        let value = data.to_json().expect("should serialize");
        assert_eq!(value["object"], "federation");
        assert_eq!(value["action"], "challenge");
        assert_eq!(value["valid_until"], 10);

        let reparsed = MessageData::from_slice(&data.to_bytes().expect("bytes")).expect("parse");
        assert_eq!(reparsed, data);
    }
}
