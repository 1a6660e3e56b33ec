use std::collections::HashMap;
use std::sync::Arc;
use log::{info, warn};
use serde_json::json;
use tokio::sync::Mutex;
use crate::model::{Bet, BetStatus, Direction, Prediction, Round, RoundStatus, User};
use crate::{now_millis, EntityStore, Error, GameConfig, Result};

/// Outcome of settling one round.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub round: Round,
    pub bets: Vec<Bet>,
    pub predictions: Vec<Prediction>,
    /// Users whose points or score changed, as stored after settlement.
    pub users: Vec<User>,
}

impl Settlement {
    /// The direction the round closed in, `None` for a flat round.
    pub fn outcome(&self) -> Option<Direction> {
        self.round.end_price.and_then(|end| Direction::of_move(self.round.start_price, end))
    }
}

/// Opens rounds, takes bets and predictions, and settles them.
///
/// Mutations are serialized by a lock because each one is a read-modify-write
/// over several records. Other writers of the same user records share it
/// through [`RoundManager::with_lock`].
pub struct RoundManager {
    store: Arc<dyn EntityStore>,
    config: GameConfig,
    lock: Arc<Mutex<()>>,
}

impl RoundManager {
    pub fn new(store: Arc<dyn EntityStore>, config: GameConfig) -> Self {
        Self::with_lock(store, config, Arc::new(Mutex::new(())))
    }

    pub fn with_lock(store: Arc<dyn EntityStore>, config: GameConfig, lock: Arc<Mutex<()>>) -> Self {
        Self { store, config, lock }
    }

    pub async fn open_round(&self, symbol: Option<&str>, start_price: f64) -> Result<Round> {
        self.open_round_at(symbol, start_price, now_millis()).await
    }

    pub async fn open_round_at(&self, symbol: Option<&str>, start_price: f64, now: u64) -> Result<Round> {
        if !start_price.is_finite() || start_price <= 0.0 {
            return Err(Error::InvalidAmount(format!("start price must be positive, got {}", start_price)));
        }
        let round = Round {
            symbol: symbol.unwrap_or(&self.config.symbol).to_uppercase(),
            start_time: now,
            end_time: now.saturating_add(self.config.round_duration_secs.saturating_mul(1000)),
            start_price,
            status: RoundStatus::Open,
            ..Default::default()
        };
        let round = self.store.table::<Round>().create(&round).await?;
        info!("Opened round {} on {} at {}", round.id, round.symbol, round.start_price);
        Ok(round)
    }

    pub async fn get_round(&self, round_id: &str) -> Result<Round> {
        self.store.table::<Round>().get(round_id).await.map_err(|e| match e {
            Error::RecordNotFound { .. } => Error::RoundNotFound(round_id.to_string()),
            other => other,
        })
    }

    pub async fn open_rounds(&self) -> Result<Vec<Round>> {
        self.store.table::<Round>().filter(json!({"status": RoundStatus::Open})).await
    }

    /// Bets of one user, newest first.
    pub async fn user_bets(&self, user_id: &str) -> Result<Vec<Bet>> {
        let mut bets = self.store.table::<Bet>().filter(json!({"user_id": user_id})).await?;
        bets.sort_by(|a, b| b.created_date.cmp(&a.created_date));
        Ok(bets)
    }

    pub async fn place_bet(&self, user_id: &str, round_id: &str, direction: Direction, amount: i64) -> Result<(Bet, User)> {
        self.place_bet_at(user_id, round_id, direction, amount, now_millis()).await
    }

    /// Stakes `amount` CTT; the points leave the balance immediately.
    pub async fn place_bet_at(&self, user_id: &str, round_id: &str, direction: Direction, amount: i64, now: u64) -> Result<(Bet, User)> {
        let _guard = self.lock.lock().await;

        if amount < self.config.min_bet {
            return Err(Error::InvalidAmount(format!("minimum bet is {}", self.config.min_bet)));
        }
        if let Some(max) = self.config.max_bet {
            if amount > max {
                return Err(Error::InvalidAmount(format!("maximum bet is {}", max)));
            }
        }

        let round = self.get_round(round_id).await?;
        if !round.accepts_entries(now) {
            return Err(Error::RoundClosed(round.id));
        }

        let users = self.store.table::<User>();
        let user = users.get(user_id).await.map_err(|_| Error::UserNotFound(user_id.to_string()))?;
        if user.points < amount {
            return Err(Error::InsufficientPoints { available: user.points, required: amount });
        }

        let bets = self.store.table::<Bet>();
        if bets.find_one(json!({"user_id": user_id, "round_id": round_id})).await?.is_some() {
            return Err(Error::DuplicateEntry(format!("user {} already bet on round {}", user_id, round_id)));
        }

        let bet = bets.create(&Bet {
            user_id: user_id.to_string(),
            round_id: round_id.to_string(),
            direction,
            amount,
            status: BetStatus::Pending,
            ..Default::default()
        }).await?;
        let user = users.update(user_id, json!({
            "points": user.points - amount,
            "total_bets": user.total_bets + 1,
        })).await?;

        Ok((bet, user))
    }

    pub async fn predict(&self, user_id: &str, round_id: &str, direction: Direction) -> Result<Prediction> {
        self.predict_at(user_id, round_id, direction, now_millis()).await
    }

    pub async fn predict_at(&self, user_id: &str, round_id: &str, direction: Direction, now: u64) -> Result<Prediction> {
        let _guard = self.lock.lock().await;

        let round = self.get_round(round_id).await?;
        if !round.accepts_entries(now) {
            return Err(Error::RoundClosed(round.id));
        }
        self.store.table::<User>().get(user_id).await.map_err(|_| Error::UserNotFound(user_id.to_string()))?;

        let predictions = self.store.table::<Prediction>();
        if predictions.find_one(json!({"user_id": user_id, "round_id": round_id})).await?.is_some() {
            return Err(Error::DuplicateEntry(format!("user {} already predicted round {}", user_id, round_id)));
        }
        predictions.create(&Prediction {
            user_id: user_id.to_string(),
            round_id: round_id.to_string(),
            direction,
            ..Default::default()
        }).await
    }

    /// Closes the round at `end_price` and pays out.
    ///
    /// Up wins on a rise, down on a fall; a flat round refunds every stake.
    pub async fn settle_round(&self, round_id: &str, end_price: f64) -> Result<Settlement> {
        let _guard = self.lock.lock().await;
        self.settle_locked(round_id, end_price).await
    }

    /// Settles every open round whose window has elapsed at `now`.
    pub async fn settle_due_rounds(&self, now: u64, price: f64) -> Result<Vec<Settlement>> {
        let _guard = self.lock.lock().await;
        let due: Vec<Round> = self.store.table::<Round>()
            .filter(json!({"status": RoundStatus::Open})).await?
            .into_iter()
            .filter(|r| r.is_due(now))
            .collect();

        let mut settled = Vec::with_capacity(due.len());
        for round in due {
            settled.push(self.settle_locked(&round.id, price).await?);
        }
        Ok(settled)
    }

    async fn settle_locked(&self, round_id: &str, end_price: f64) -> Result<Settlement> {
        if !end_price.is_finite() || end_price <= 0.0 {
            return Err(Error::InvalidAmount(format!("end price must be positive, got {}", end_price)));
        }
        let round = self.get_round(round_id).await?;
        if round.status == RoundStatus::Settled {
            return Err(Error::AlreadySettled(round.id));
        }
        let outcome = Direction::of_move(round.start_price, end_price);

        let users = self.store.table::<User>();
        let mut touched: HashMap<String, User> = HashMap::new();

        // Users are saved before any bet leaves `pending`.
        let bets_table = self.store.table::<Bet>();
        let mut bets = Vec::new();
        let mut bet_results = Vec::new();
        for bet in bets_table.filter(json!({"round_id": round_id})).await? {
            if bet.status != BetStatus::Pending {
                bets.push(bet);
                continue;
            }
            let Some(user) = load_user(&users, &mut touched, &bet.user_id).await? else {
                warn!("Bet {} belongs to unknown user {}, leaving it pending", bet.id, bet.user_id);
                bets.push(bet);
                continue;
            };

            let (status, payout) = match outcome {
                None => {
                    user.points += bet.amount;
                    (BetStatus::Refunded, bet.amount)
                }
                Some(dir) if dir == bet.direction => {
                    let payout = self.config.payout_for(bet.amount);
                    user.points += payout;
                    user.score += payout - bet.amount;
                    user.wins += 1;
                    user.streak += 1;
                    (BetStatus::Won, payout)
                }
                Some(_) => {
                    user.streak = 0;
                    (BetStatus::Lost, 0)
                }
            };
            bet_results.push((bet.id, status, payout));
        }

        let predictions_table = self.store.table::<Prediction>();
        let mut predictions = Vec::new();
        let mut prediction_results = Vec::new();
        for prediction in predictions_table.filter(json!({"round_id": round_id})).await? {
            let Some(dir) = outcome.filter(|_| prediction.correct.is_none()) else {
                predictions.push(prediction);
                continue;
            };
            let correct = dir == prediction.direction;
            if correct {
                if let Some(user) = load_user(&users, &mut touched, &prediction.user_id).await? {
                    user.score += self.config.prediction_reward;
                }
            }
            prediction_results.push((prediction.id, correct));
        }

        let mut saved_users = Vec::with_capacity(touched.len());
        for user in touched.values() {
            saved_users.push(users.save(user).await?);
        }
        for (id, status, payout) in bet_results {
            bets.push(bets_table.update(&id, json!({"status": status, "payout": payout})).await?);
        }
        for (id, correct) in prediction_results {
            predictions.push(predictions_table.update(&id, json!({"correct": correct})).await?);
        }

        let round = self.store.table::<Round>().update(round_id, json!({
            "end_price": end_price,
            "status": RoundStatus::Settled,
        })).await?;
        info!("Settled round {} at {} ({} bets, {} predictions)", round.id, end_price, bets.len(), predictions.len());

        Ok(Settlement { round, bets, predictions, users: saved_users })
    }
}

async fn load_user<'m>(
    users: &crate::Table<'_, User>,
    touched: &'m mut HashMap<String, User>,
    user_id: &str,
) -> Result<Option<&'m mut User>> {
    if !touched.contains_key(user_id) {
        match users.get(user_id).await {
            Ok(user) => {
                touched.insert(user_id.to_string(), user);
            }
            Err(Error::RecordNotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        }
    }
    Ok(touched.get_mut(user_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemStore;
    use crate::model::Entity;
    use crate::{EntityReader, EntityWriter, TableEnumeration};
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

    async fn setup() -> (Arc<dyn EntityStore>, RoundManager, User) {
        let store: Arc<dyn EntityStore> = Arc::new(MemStore::new(HashMap::new(), None));
        let manager = RoundManager::new(store.clone(), GameConfig::default());
        let user = store.table::<User>().create(&User::new("p@x.io", "player", 1000)).await.unwrap();
        (store, manager, user)
    }

    #[tokio::test]
    async fn test_bet_deducts_points() {
        let (store, manager, user) = setup().await;
        let round = manager.open_round(None, 100.0).await.unwrap();
        assert_eq!(round.symbol, "BTC");

        let (bet, user) = manager.place_bet(&user.id, &round.id, Direction::Up, 250).await.unwrap();
        assert_eq!(bet.status, BetStatus::Pending);
        assert_eq!(user.points, 750);
        assert_eq!(user.total_bets, 1);
        assert_eq!(store.table::<User>().get(&user.id).await.unwrap().points, 750);
    }

    #[tokio::test]
    async fn test_bet_validation() {
        let (_store, manager, user) = setup().await;
        let round = manager.open_round(None, 100.0).await.unwrap();

        assert!(matches!(
            manager.place_bet(&user.id, &round.id, Direction::Up, 0).await,
            Err(Error::InvalidAmount(_))
        ));
        assert!(matches!(
            manager.place_bet(&user.id, &round.id, Direction::Up, 5000).await,
            Err(Error::InsufficientPoints { available: 1000, required: 5000 })
        ));
        manager.place_bet(&user.id, &round.id, Direction::Up, 10).await.unwrap();
        assert!(matches!(
            manager.place_bet(&user.id, &round.id, Direction::Down, 10).await,
            Err(Error::DuplicateEntry(_))
        ));
        assert!(matches!(
            manager.place_bet(&user.id, "nope", Direction::Down, 10).await,
            Err(Error::RoundNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_bet_above_max_is_rejected() {
        let store: Arc<dyn EntityStore> = Arc::new(MemStore::new(HashMap::new(), None));
        let config = GameConfig { max_bet: Some(100), ..GameConfig::default() };
        let manager = RoundManager::new(store.clone(), config);
        let user = store.table::<User>().create(&User::new("p@x.io", "player", 1000)).await.unwrap();
        let round = manager.open_round(None, 100.0).await.unwrap();

        assert!(matches!(
            manager.place_bet(&user.id, &round.id, Direction::Up, 101).await,
            Err(Error::InvalidAmount(_))
        ));
        let (_, user) = manager.place_bet(&user.id, &round.id, Direction::Up, 100).await.unwrap();
        assert_eq!(user.points, 900);
    }

    #[tokio::test]
    async fn test_bet_after_window_is_rejected() {
        let (_store, manager, user) = setup().await;
        let round = manager.open_round_at(None, 100.0, 1_000).await.unwrap();
        let res = manager.place_bet_at(&user.id, &round.id, Direction::Up, 10, round.end_time).await;
        assert!(matches!(res, Err(Error::RoundClosed(_))));
    }

    #[tokio::test]
    async fn test_settle_win_and_loss() {
        let (store, manager, winner) = setup().await;
        let loser = store.table::<User>().create(&User::new("l@x.io", "loser", 1000)).await.unwrap();
        let round = manager.open_round(Some("eth"), 100.0).await.unwrap();

        manager.place_bet(&winner.id, &round.id, Direction::Up, 100).await.unwrap();
        manager.place_bet(&loser.id, &round.id, Direction::Down, 100).await.unwrap();

        let settlement = manager.settle_round(&round.id, 105.0).await.unwrap();
        assert_eq!(settlement.outcome(), Some(Direction::Up));
        assert_eq!(settlement.round.status, RoundStatus::Settled);
        assert_eq!(settlement.users.len(), 2);

        let users = store.table::<User>();
        let winner = users.get(&winner.id).await.unwrap();
        assert_eq!(winner.points, 1100);
        assert_eq!(winner.score, 100);
        assert_eq!(winner.wins, 1);
        assert_eq!(winner.streak, 1);

        let loser = users.get(&loser.id).await.unwrap();
        assert_eq!(loser.points, 900);
        assert_eq!(loser.score, 0);
        assert_eq!(loser.streak, 0);
    }

    #[tokio::test]
    async fn test_flat_round_refunds() {
        let (store, manager, user) = setup().await;
        let round = manager.open_round(None, 100.0).await.unwrap();
        manager.place_bet(&user.id, &round.id, Direction::Down, 300).await.unwrap();
        manager.predict(&user.id, &round.id, Direction::Down).await.unwrap();

        let settlement = manager.settle_round(&round.id, 100.0).await.unwrap();
        assert_eq!(settlement.bets[0].status, BetStatus::Refunded);
        assert_eq!(settlement.predictions[0].correct, None);

        let user = store.table::<User>().get(&user.id).await.unwrap();
        assert_eq!(user.points, 1000);
        assert_eq!(user.score, 0);
    }

    #[tokio::test]
    async fn test_correct_prediction_adds_score() {
        let (store, manager, user) = setup().await;
        let round = manager.open_round(None, 100.0).await.unwrap();
        manager.predict(&user.id, &round.id, Direction::Down).await.unwrap();
        assert!(matches!(
            manager.predict(&user.id, &round.id, Direction::Up).await,
            Err(Error::DuplicateEntry(_))
        ));

        let settlement = manager.settle_round(&round.id, 90.0).await.unwrap();
        assert_eq!(settlement.predictions[0].correct, Some(true));
        assert_eq!(store.table::<User>().get(&user.id).await.unwrap().score, 10);
    }

    #[tokio::test]
    async fn test_settle_twice_fails() {
        let (_store, manager, _user) = setup().await;
        let round = manager.open_round(None, 100.0).await.unwrap();
        manager.settle_round(&round.id, 101.0).await.unwrap();
        assert!(matches!(
            manager.settle_round(&round.id, 99.0).await,
            Err(Error::AlreadySettled(_))
        ));
    }

    /// Store whose bet updates fail while `fail_bets` is set.
    struct BetWritesFail {
        inner: MemStore,
        fail_bets: AtomicBool,
    }

    #[async_trait]
    impl EntityReader for BetWritesFail {
        async fn get(&self, table: &str, id: &str) -> Result<Value> {
            self.inner.get(table, id).await
        }

        async fn list(&self, table: &str) -> Result<Vec<Value>> {
            self.inner.list(table).await
        }

        async fn filter(&self, table: &str, query: &Map<String, Value>) -> Result<Vec<Value>> {
            self.inner.filter(table, query).await
        }
    }

    #[async_trait]
    impl EntityWriter for BetWritesFail {
        async fn create(&self, table: &str, record: Value) -> Result<Value> {
            self.inner.create(table, record).await
        }

        async fn update(&self, table: &str, id: &str, patch: Value) -> Result<Value> {
            if table == Bet::TABLE && self.fail_bets.load(AtomicOrdering::SeqCst) {
                return Err(Error::Internal("disk full".to_string()));
            }
            self.inner.update(table, id, patch).await
        }

        async fn delete(&self, table: &str, id: &str) -> Result<()> {
            self.inner.delete(table, id).await
        }

        async fn replace_all(&self, table: &str, records: Vec<Value>) -> Result<()> {
            self.inner.replace_all(table, records).await
        }
    }

    #[async_trait]
    impl TableEnumeration for BetWritesFail {
        async fn tables(&self) -> Result<Vec<String>> {
            self.inner.tables().await
        }
    }

    impl EntityStore for BetWritesFail {}

    #[tokio::test]
    async fn test_interrupted_settlement_has_paid_winners() {
        let failing = Arc::new(BetWritesFail {
            inner: MemStore::new(HashMap::new(), None),
            fail_bets: AtomicBool::new(false),
        });
        let store: Arc<dyn EntityStore> = failing.clone();
        let manager = RoundManager::new(store.clone(), GameConfig::default());
        let user = store.table::<User>().create(&User::new("p@x.io", "player", 1000)).await.unwrap();
        let round = manager.open_round(None, 100.0).await.unwrap();
        manager.place_bet(&user.id, &round.id, Direction::Up, 100).await.unwrap();

        failing.fail_bets.store(true, AtomicOrdering::SeqCst);
        assert!(manager.settle_round(&round.id, 110.0).await.is_err());

        let user = store.table::<User>().get(&user.id).await.unwrap();
        assert_eq!(user.points, 1100);
        assert_eq!(user.wins, 1);
        assert_eq!(manager.get_round(&round.id).await.unwrap().status, RoundStatus::Open);
    }

    #[tokio::test]
    async fn test_settle_due_rounds_only_settles_elapsed() {
        let (_store, manager, _user) = setup().await;
        let old = manager.open_round_at(None, 100.0, 1_000).await.unwrap();
        let fresh = manager.open_round_at(None, 100.0, old.end_time).await.unwrap();

        let settled = manager.settle_due_rounds(old.end_time, 120.0).await.unwrap();
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].round.id, old.id);

        let open = manager.open_rounds().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, fresh.id);
    }
}
