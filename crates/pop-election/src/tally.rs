//! Vote aggregation at election end.

use crate::{ElectionError, ElectionRecord};
use pop_channels::messages_with_action;
use pop_types::data::{BallotCount, ElectionResult, QuestionResult, VoteChoice, PLURALITY};
use pop_types::{decode_base64, hash, MessageData};
use rusqlite::Connection;
use std::collections::BTreeMap;

/// The vote currently counted for one (question, voter) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidVote {
    pub vote_id: String,
    pub question: String,
    pub voter: String,
    pub choice: VoteChoice,
    pub created_at: i64,
}

/// Valid votes of one election, ready to be checked and counted.
#[derive(Debug)]
pub struct ElectionTally<'a> {
    election: &'a ElectionRecord,
    votes: BTreeMap<(String, String), ValidVote>,
}

impl<'a> ElectionTally<'a> {
    pub fn new(election: &'a ElectionRecord) -> Self {
        Self {
            election,
            votes: BTreeMap::new(),
        }
    }

    /// Replays every stored `cast_vote` of the election in storage order.
    pub fn load(conn: &Connection, election: &'a ElectionRecord) -> Result<Self, ElectionError> {
        let mut tally = Self::new(election);
        for stored in messages_with_action(conn, &election.path, "election", "cast_vote")? {
            let cast = match stored.parse_data() {
                Ok(MessageData::CastVote(cast)) => cast,
                Ok(_) => continue,
                Err(e) => return Err(ElectionError::MalformedVote(e.to_string())),
            };
            for vote in cast.votes {
                tally.record(ValidVote {
                    vote_id: vote.id,
                    question: vote.question,
                    voter: stored.message.sender.clone(),
                    choice: vote.vote,
                    created_at: cast.created_at,
                });
            }
        }
        Ok(tally)
    }

    /// Records a vote. A held vote is replaced only by a strictly later one;
    /// on equal timestamps the vote recorded first stays.
    pub fn record(&mut self, vote: ValidVote) {
        let key = (vote.question.clone(), vote.voter.clone());
        match self.votes.get(&key) {
            Some(held) if held.created_at >= vote.created_at => {}
            _ => {
                self.votes.insert(key, vote);
            }
        }
    }

    pub fn votes(&self) -> impl Iterator<Item = &ValidVote> {
        self.votes.values()
    }

    /// Hash of the sorted ids of every valid vote.
    pub fn registered_votes(&self) -> String {
        let mut ids: Vec<&str> = self.votes.values().map(|v| v.vote_id.as_str()).collect();
        ids.sort_unstable();
        hash(&ids)
    }

    /// Checks a claimed `registered_votes` value. An empty claim is accepted.
    pub fn verify_registered(&self, claimed: &str) -> Result<(), ElectionError> {
        if claimed.is_empty() {
            return Ok(());
        }
        let expected = self.registered_votes();
        if expected != claimed {
            return Err(ElectionError::RegisteredVotesMismatch {
                expected,
                actual: claimed.to_string(),
            });
        }
        Ok(())
    }

    fn option_index(&self, choice: &VoteChoice) -> Option<usize> {
        match choice {
            VoteChoice::Index(index) => usize::try_from(*index).ok(),
            VoteChoice::Encrypted(ciphertext) => {
                let bytes = decode_base64(ciphertext).ok()?;
                match self.election.keys.decrypt_index(&bytes) {
                    Ok(index) => Some(usize::from(index)),
                    Err(e) => {
                        tracing::debug!(
                            election = %self.election.path,
                            "skipping undecryptable ballot: {}",
                            e
                        );
                        None
                    }
                }
            }
        }
    }

    /// Counts plurality questions in setup order. Approval questions are
    /// validated at cast time but not counted.
    pub fn result(&self) -> ElectionResult {
        let mut questions = Vec::new();

        for question in &self.election.questions {
            if question.voting_method != PLURALITY {
                continue;
            }

            let mut counts = vec![0u64; question.ballot_options.len()];
            for vote in self.votes.values().filter(|v| v.question == question.id) {
                match self.option_index(&vote.choice) {
                    Some(index) if index < counts.len() => counts[index] += 1,
                    _ => {}
                }
            }

            questions.push(QuestionResult {
                id: question.id.clone(),
                result: question
                    .ballot_options
                    .iter()
                    .zip(counts)
                    .map(|(option, count)| BallotCount {
                        ballot_option: option.clone(),
                        count,
                    })
                    .collect(),
            });
        }

        ElectionResult { questions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pop_crypto::{encrypt_index, ElectionKeyPair};
    use pop_types::data::{ElectionQuestion, APPROVAL, OPEN_BALLOT, SECRET_BALLOT};
    use pop_types::encode_base64;

    fn election(version: &str) -> ElectionRecord {
        ElectionRecord {
            path: "/root/lao/e".to_string(),
            lao_path: "/root/lao".to_string(),
            election_id: "e".to_string(),
            version: version.to_string(),
            created_at: 10,
            questions: vec![
                ElectionQuestion {
                    id: "q1".to_string(),
                    question: "Colour?".to_string(),
                    voting_method: PLURALITY.to_string(),
                    ballot_options: vec!["red".to_string(), "blue".to_string(), "green".to_string()],
                    write_in: false,
                },
                ElectionQuestion {
                    id: "q2".to_string(),
                    question: "Approve?".to_string(),
                    voting_method: APPROVAL.to_string(),
                    ballot_options: vec!["yes".to_string(), "no".to_string()],
                    write_in: false,
                },
            ],
            keys: ElectionKeyPair::generate(),
        }
    }

    fn vote(id: &str, question: &str, voter: &str, choice: VoteChoice, at: i64) -> ValidVote {
        ValidVote {
            vote_id: id.to_string(),
            question: question.to_string(),
            voter: voter.to_string(),
            choice,
            created_at: at,
        }
    }

    fn counts(result: &ElectionResult) -> Vec<(String, u64)> {
        result.questions[0]
            .result
            .iter()
            .map(|c| (c.ballot_option.clone(), c.count))
            .collect()
    }

    #[test]
    fn open_ballot_matches_manual_count() {
        let election = election(OPEN_BALLOT);
        let mut tally = ElectionTally::new(&election);
        let choices = [(0, "a"), (1, "b"), (1, "c"), (2, "d"), (1, "e")];
        for (i, (choice, voter)) in choices.iter().enumerate() {
            tally.record(vote(&format!("v{i}"), "q1", voter, VoteChoice::Index(*choice), 20));
        }
        // approval votes are not counted
        tally.record(vote("a1", "q2", "a", VoteChoice::Index(0), 20));

        let result = tally.result();
        assert_eq!(result.questions.len(), 1);
        assert_eq!(
            counts(&result),
            vec![
                ("red".to_string(), 1),
                ("blue".to_string(), 3),
                ("green".to_string(), 1)
            ]
        );
    }

    #[test]
    fn later_vote_replaces_and_ties_keep_first() {
        let election = election(OPEN_BALLOT);
        let mut tally = ElectionTally::new(&election);
        tally.record(vote("v1", "q1", "a", VoteChoice::Index(0), 20));
        tally.record(vote("v2", "q1", "a", VoteChoice::Index(1), 20));
        assert_eq!(counts(&tally.result())[0].1, 1, "tie keeps the first vote");

        tally.record(vote("v3", "q1", "a", VoteChoice::Index(2), 19));
        assert_eq!(counts(&tally.result())[0].1, 1, "older vote is ignored");

        tally.record(vote("v4", "q1", "a", VoteChoice::Index(2), 21));
        assert_eq!(
            counts(&tally.result()),
            vec![
                ("red".to_string(), 0),
                ("blue".to_string(), 0),
                ("green".to_string(), 1)
            ]
        );
        let ids: Vec<&str> = tally.votes().map(|v| v.vote_id.as_str()).collect();
        assert_eq!(ids, vec!["v4"]);
    }

    #[test]
    fn out_of_range_indexes_are_skipped() {
        let election = election(OPEN_BALLOT);
        let mut tally = ElectionTally::new(&election);
        tally.record(vote("v1", "q1", "a", VoteChoice::Index(7), 20));
        tally.record(vote("v2", "q1", "b", VoteChoice::Index(-1), 20));
        tally.record(vote("v3", "q1", "c", VoteChoice::Index(0), 20));
        assert_eq!(counts(&tally.result())[0], ("red".to_string(), 1));
    }

    #[test]
    fn secret_ballot_decrypts_each_vote() {
        let election = election(SECRET_BALLOT);
        let public = election.keys.public_key();
        let mut tally = ElectionTally::new(&election);
        for (i, index) in [2u16, 2, 0, 9].iter().enumerate() {
            let ciphertext = encrypt_index(&public, *index).expect("encrypt");
            tally.record(vote(
                &format!("v{i}"),
                "q1",
                &format!("voter{i}"),
                VoteChoice::Encrypted(encode_base64(ciphertext)),
                20,
            ));
        }
        tally.record(vote("bad", "q1", "x", VoteChoice::Encrypted("AAAA".to_string()), 20));

        assert_eq!(
            counts(&tally.result()),
            vec![
                ("red".to_string(), 1),
                ("blue".to_string(), 0),
                ("green".to_string(), 2)
            ]
        );
    }

    #[test]
    fn registered_votes_hash_is_order_independent() {
        let election = election(OPEN_BALLOT);
        let mut forward = ElectionTally::new(&election);
        forward.record(vote("b", "q1", "x", VoteChoice::Index(0), 20));
        forward.record(vote("a", "q1", "y", VoteChoice::Index(0), 20));

        let mut backward = ElectionTally::new(&election);
        backward.record(vote("a", "q1", "y", VoteChoice::Index(0), 20));
        backward.record(vote("b", "q1", "x", VoteChoice::Index(0), 20));

        assert_eq!(forward.registered_votes(), hash(&["a", "b"]));
        assert_eq!(forward.registered_votes(), backward.registered_votes());
        forward
            .verify_registered(&hash(&["a", "b"]))
            .expect("matching hash accepted");
        forward.verify_registered("").expect("empty claim accepted");
        assert!(matches!(
            forward.verify_registered(&hash(&["a"])),
            Err(ElectionError::RegisteredVotesMismatch { .. })
        ));
    }
}
