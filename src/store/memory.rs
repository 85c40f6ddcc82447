//! An in-memory `Store` test double with the exact same contract as
//! `PostgresStore`, so property tests that don't need a real database
//! still exercise real call sites (§8).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::model::{
    Advisory, Capture, Flag, NewFlag, Round, RoundResult, Service, ServiceState, Team,
};
use crate::store::Store;

#[derive(Default)]
struct Inner {
    teams: Vec<Team>,
    services: Vec<Service>,
    rounds: Vec<Round>,
    statuses: Vec<(i64, Uuid, Uuid, ServiceState)>,
    flags: Vec<Flag>,
    captures: HashMap<Uuid, Capture>,
    round_results: HashMap<(Uuid, i64), RoundResult>,
    advisories: Vec<Advisory>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    capture_window_rounds: u32,
}

impl MemoryStore {
    pub fn new(capture_window_rounds: u32) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capture_window_rounds,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn add_team(&self, team: &Team) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.teams.iter().any(|t| t.subnet == team.subnet) {
            return Err(StoreError::SubnetConflict);
        }
        inner.teams.push(team.clone());
        Ok(())
    }

    async fn add_service(&self, service: &Service) -> Result<(), StoreError> {
        self.inner.lock().unwrap().services.push(service.clone());
        Ok(())
    }

    async fn get_teams(&self) -> Result<Vec<Team>, StoreError> {
        Ok(self.inner.lock().unwrap().teams.clone())
    }

    async fn get_services(&self) -> Result<Vec<Service>, StoreError> {
        Ok(self.inner.lock().unwrap().services.clone())
    }

    async fn new_round(&self, length_secs: i64) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.rounds.last().map(|r| r.id + 1).unwrap_or(1);
        inner.rounds.push(Round {
            id,
            start_time: Utc::now(),
            length_secs,
            end_time: None,
        });
        Ok(id)
    }

    async fn close_round(&self, round: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(r) = inner.rounds.iter_mut().find(|r| r.id == round) {
            r.end_time = Some(Utc::now());
        }
        Ok(())
    }

    async fn put_status(
        &self,
        round: i64,
        team_id: Uuid,
        service_id: Uuid,
        state: ServiceState,
    ) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .statuses
            .push((round, team_id, service_id, state));
        Ok(())
    }

    async fn get_states(
        &self,
        round: i64,
        team_id: Uuid,
        service_id: Uuid,
    ) -> Result<Vec<ServiceState>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .statuses
            .iter()
            .filter(|(r, t, s, _)| *r == round && *t == team_id && *s == service_id)
            .map(|(_, _, _, state)| *state)
            .collect())
    }

    async fn add_flag(&self, flag: NewFlag) -> Result<Flag, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.flags.iter().any(|f| f.token == flag.token) {
            return Err(StoreError::DuplicateToken);
        }
        let stored = Flag {
            id: Uuid::new_v4(),
            token: flag.token,
            round: flag.round,
            team_id: flag.team_id,
            service_id: flag.service_id,
            cred: flag.cred,
        };
        inner.flags.push(stored.clone());
        Ok(stored)
    }

    async fn get_flag_info(&self, token: &str) -> Result<Flag, StoreError> {
        self.inner
            .lock()
            .unwrap()
            .flags
            .iter()
            .find(|f| f.token == token)
            .cloned()
            .ok_or(StoreError::UnknownFlag)
    }

    async fn get_cred(
        &self,
        round: i64,
        team_id: Uuid,
        service_id: Uuid,
    ) -> Result<(String, Option<String>), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .flags
            .iter()
            .rev()
            .find(|f| f.round == round && f.team_id == team_id && f.service_id == service_id)
            .map(|f| (f.token.clone(), f.cred.clone()))
            .ok_or(StoreError::UnknownFlag)
    }

    async fn capture_flag(&self, flag_id: Uuid, attacker_team_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let flag = inner
            .flags
            .iter()
            .find(|f| f.id == flag_id)
            .cloned()
            .ok_or(StoreError::UnknownFlag)?;

        if flag.team_id == attacker_team_id {
            return Err(StoreError::SelfCapture);
        }

        let current_round = inner.rounds.last().map(|r| r.id).unwrap_or(flag.round);
        if current_round.saturating_sub(flag.round) >= self.capture_window_rounds as i64 {
            return Err(StoreError::FlagExpired);
        }

        if inner.captures.contains_key(&flag_id) {
            return Err(StoreError::AlreadyCaptured);
        }

        inner.captures.insert(
            flag_id,
            Capture {
                flag_id,
                attacker_team_id,
                timestamp: Utc::now(),
            },
        );
        Ok(())
    }

    async fn already_captured(&self, flag_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.inner.lock().unwrap().captures.contains_key(&flag_id))
    }

    async fn get_captured_flags(
        &self,
        round: i64,
        attacker_team_id: Uuid,
    ) -> Result<Vec<Flag>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .captures
            .values()
            .filter(|c| c.attacker_team_id == attacker_team_id)
            .filter_map(|c| inner.flags.iter().find(|f| f.id == c.flag_id))
            .filter(|f| f.round == round)
            .cloned()
            .collect())
    }

    async fn put_round_result(&self, result: RoundResult) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .round_results
            .insert((result.team_id, result.round), result);
        Ok(())
    }

    async fn get_round_result(
        &self,
        team_id: Uuid,
        round: i64,
    ) -> Result<Option<RoundResult>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .round_results
            .get(&(team_id, round))
            .copied())
    }

    async fn get_all_round_results(&self) -> Result<Vec<RoundResult>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .round_results
            .values()
            .copied()
            .collect())
    }

    async fn add_advisory(&self, advisory: Advisory) -> Result<(), StoreError> {
        self.inner.lock().unwrap().advisories.push(advisory);
        Ok(())
    }

    async fn list_advisories(&self, not_reviewed_only: bool) -> Result<Vec<Advisory>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .advisories
            .iter()
            .filter(|a| !not_reviewed_only || !a.reviewed)
            .cloned()
            .collect())
    }

    async fn review_advisory(&self, id: Uuid, score: f64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let advisory = inner
            .advisories
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(StoreError::NotFound)?;
        advisory.reviewed = true;
        advisory.score = score;
        Ok(())
    }

    async fn set_advisory_hidden(&self, id: Uuid, hidden: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let advisory = inner
            .advisories
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(StoreError::NotFound)?;
        advisory.hidden = hidden;
        Ok(())
    }

    fn capture_window_rounds(&self) -> u32 {
        self.capture_window_rounds
    }
}
