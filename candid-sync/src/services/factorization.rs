//! Matrix factorization over sparse vote matrices
//!
//! Fits 2-dimensional latent vectors per user and per comment from
//! {user x comment -> vote} triples via regularized stochastic gradient
//! descent. When external PCA coordinates are available for a user, an
//! additional pull term `lambda_polis * |f_u - pull_u|^2` anchors the
//! latent space to the externally observed clustering, keeping the two
//! coordinate systems comparable.
//!
//! The engine is pure compute: no I/O, deterministic under a fixed seed.
//! Persistence of the result and the audit row belongs to the training
//! worker.

use candid_common::Coords;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use uuid::Uuid;

/// Latent space dimension, fixed to match the 2D coordinate system.
const LATENT_DIM: usize = 2;

/// Initial factor magnitude bound
const INIT_SCALE: f64 = 0.1;

/// Engine hyperparameters
#[derive(Debug, Clone)]
pub struct FactorizationConfig {
    /// SGD step size
    pub learning_rate: f64,
    /// L2 regularization strength on all factors
    pub l2_lambda: f64,
    /// Pull-regularization strength toward external coordinates
    pub pull_lambda: f64,
    /// Epoch budget
    pub max_epochs: usize,
    /// Early-stop threshold on per-epoch loss improvement
    pub convergence_tol: f64,
    /// Minimum distinct voters required to train
    pub min_voters: usize,
    /// Minimum votes required to train
    pub min_votes: usize,
    /// Fixed seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for FactorizationConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.02,
            l2_lambda: 0.01,
            pull_lambda: 0.1,
            max_epochs: 200,
            convergence_tol: 1e-4,
            min_voters: 7,
            min_votes: 20,
            seed: None,
        }
    }
}

/// One vote observation on the external scale {-1, 0, +1}
#[derive(Debug, Clone, Copy)]
pub struct VoteObservation {
    pub user_id: Uuid,
    pub comment_id: Uuid,
    pub value: f64,
}

/// Fitted model
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub user_factors: HashMap<Uuid, [f64; LATENT_DIM]>,
    pub comment_factors: HashMap<Uuid, [f64; LATENT_DIM]>,
    pub epochs_run: usize,
    pub final_loss: f64,
    pub n_users: usize,
    pub n_comments: usize,
    pub n_votes: usize,
}

impl TrainedModel {
    /// User factors as coordinate points.
    pub fn user_coords(&self) -> impl Iterator<Item = (Uuid, Coords)> + '_ {
        self.user_factors
            .iter()
            .map(|(id, f)| (*id, Coords::new(f[0], f[1])))
    }

    /// Comment factors as coordinate points.
    pub fn comment_coords(&self) -> impl Iterator<Item = (Uuid, Coords)> + '_ {
        self.comment_factors
            .iter()
            .map(|(id, f)| (*id, Coords::new(f[0], f[1])))
    }
}

/// Training result: data shortage is a normal outcome, not an error.
#[derive(Debug, Clone)]
pub enum TrainingOutcome {
    /// Too little data to produce meaningful coordinates; no training
    /// was performed.
    InsufficientData { n_users: usize, n_votes: usize },
    /// Model fitted.
    Trained(TrainedModel),
}

/// Matrix factorization engine
pub struct FactorizationEngine {
    config: FactorizationConfig,
}

impl FactorizationEngine {
    pub fn new(config: FactorizationConfig) -> Self {
        Self { config }
    }

    /// Fit latent factors from vote observations.
    ///
    /// `pull_coords` maps users to externally supplied 2D coordinates;
    /// users absent from the map are regularized toward the origin only.
    pub fn train(
        &self,
        votes: &[VoteObservation],
        pull_coords: &HashMap<Uuid, Coords>,
    ) -> TrainingOutcome {
        let mut user_index: HashMap<Uuid, usize> = HashMap::new();
        let mut comment_index: HashMap<Uuid, usize> = HashMap::new();
        for vote in votes {
            let next = user_index.len();
            user_index.entry(vote.user_id).or_insert(next);
            let next = comment_index.len();
            comment_index.entry(vote.comment_id).or_insert(next);
        }

        let n_users = user_index.len();
        let n_comments = comment_index.len();
        let n_votes = votes.len();

        if n_users < self.config.min_voters || n_votes < self.config.min_votes {
            return TrainingOutcome::InsufficientData { n_users, n_votes };
        }

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut user_factors = vec![[0.0f64; LATENT_DIM]; n_users];
        let mut comment_factors = vec![[0.0f64; LATENT_DIM]; n_comments];
        for f in user_factors.iter_mut().chain(comment_factors.iter_mut()) {
            for v in f.iter_mut() {
                *v = rng.gen_range(-INIT_SCALE..INIT_SCALE);
            }
        }

        // Dense pull targets aligned with the user index
        let mut pull: Vec<Option<[f64; LATENT_DIM]>> = vec![None; n_users];
        for (user_id, coords) in pull_coords {
            if let Some(&u) = user_index.get(user_id) {
                pull[u] = Some([coords.x, coords.y]);
            }
        }

        let lr = self.config.learning_rate;
        let l2 = self.config.l2_lambda;
        let pl = self.config.pull_lambda;

        let mut prev_loss = f64::INFINITY;
        let mut epochs_run = 0;
        let mut final_loss = 0.0;

        for epoch in 0..self.config.max_epochs {
            for vote in votes {
                let u = user_index[&vote.user_id];
                let c = comment_index[&vote.comment_id];

                let prediction: f64 = (0..LATENT_DIM)
                    .map(|k| user_factors[u][k] * comment_factors[c][k])
                    .sum();
                let err = vote.value - prediction;

                for k in 0..LATENT_DIM {
                    let fu = user_factors[u][k];
                    let fc = comment_factors[c][k];
                    user_factors[u][k] += lr * (err * fc - l2 * fu);
                    comment_factors[c][k] += lr * (err * fu - l2 * fc);
                }
            }

            // Pull pass: anchor users with external coordinates
            for (u, target) in pull.iter().enumerate() {
                if let Some(t) = target {
                    for k in 0..LATENT_DIM {
                        user_factors[u][k] -= lr * pl * (user_factors[u][k] - t[k]);
                    }
                }
            }

            let loss = self.loss(votes, &user_index, &comment_index, &user_factors, &comment_factors, &pull);
            epochs_run = epoch + 1;
            final_loss = loss;

            if !loss.is_finite() {
                tracing::warn!(epoch, "Factorization loss diverged, stopping");
                break;
            }
            if prev_loss - loss < self.config.convergence_tol && loss <= prev_loss {
                break;
            }
            prev_loss = loss;
        }

        let user_out = user_index
            .iter()
            .map(|(id, &u)| (*id, user_factors[u]))
            .collect();
        let comment_out = comment_index
            .iter()
            .map(|(id, &c)| (*id, comment_factors[c]))
            .collect();

        TrainingOutcome::Trained(TrainedModel {
            user_factors: user_out,
            comment_factors: comment_out,
            epochs_run,
            final_loss,
            n_users,
            n_comments,
            n_votes,
        })
    }

    fn loss(
        &self,
        votes: &[VoteObservation],
        user_index: &HashMap<Uuid, usize>,
        comment_index: &HashMap<Uuid, usize>,
        user_factors: &[[f64; LATENT_DIM]],
        comment_factors: &[[f64; LATENT_DIM]],
        pull: &[Option<[f64; LATENT_DIM]>],
    ) -> f64 {
        let mut loss = 0.0;

        for vote in votes {
            let u = user_index[&vote.user_id];
            let c = comment_index[&vote.comment_id];
            let prediction: f64 = (0..LATENT_DIM)
                .map(|k| user_factors[u][k] * comment_factors[c][k])
                .sum();
            let err = vote.value - prediction;
            loss += err * err;
        }

        let l2 = self.config.l2_lambda;
        for f in user_factors.iter().chain(comment_factors.iter()) {
            loss += l2 * f.iter().map(|v| v * v).sum::<f64>();
        }

        let pl = self.config.pull_lambda;
        for (u, target) in pull.iter().enumerate() {
            if let Some(t) = target {
                loss += pl
                    * (0..LATENT_DIM)
                        .map(|k| {
                            let d = user_factors[u][k] - t[k];
                            d * d
                        })
                        .sum::<f64>();
            }
        }

        loss
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(seed: u64) -> FactorizationConfig {
        FactorizationConfig {
            min_voters: 2,
            min_votes: 4,
            seed: Some(seed),
            ..FactorizationConfig::default()
        }
    }

    /// Two camps voting in perfect opposition on four comments.
    fn polarized_votes() -> (Vec<Uuid>, Vec<Uuid>, Vec<VoteObservation>) {
        let users: Vec<Uuid> = (0..6).map(|_| Uuid::new_v4()).collect();
        let comments: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();

        let mut votes = Vec::new();
        for (i, user) in users.iter().enumerate() {
            let camp = if i < 3 { 1.0 } else { -1.0 };
            for comment in &comments {
                votes.push(VoteObservation {
                    user_id: *user,
                    comment_id: *comment,
                    value: camp,
                });
            }
        }
        (users, comments, votes)
    }

    #[test]
    fn insufficient_data_short_circuits() {
        let engine = FactorizationEngine::new(FactorizationConfig::default());
        let votes = vec![VoteObservation {
            user_id: Uuid::new_v4(),
            comment_id: Uuid::new_v4(),
            value: 1.0,
        }];

        match engine.train(&votes, &HashMap::new()) {
            TrainingOutcome::InsufficientData { n_users, n_votes } => {
                assert_eq!(n_users, 1);
                assert_eq!(n_votes, 1);
            }
            TrainingOutcome::Trained(_) => panic!("trained on insufficient data"),
        }
    }

    #[test]
    fn empty_input_is_insufficient() {
        let engine = FactorizationEngine::new(FactorizationConfig::default());
        match engine.train(&[], &HashMap::new()) {
            TrainingOutcome::InsufficientData { n_users, n_votes } => {
                assert_eq!(n_users, 0);
                assert_eq!(n_votes, 0);
            }
            TrainingOutcome::Trained(_) => panic!("trained on empty input"),
        }
    }

    #[test]
    fn fixed_seed_is_deterministic() {
        let (_, _, votes) = polarized_votes();
        let engine = FactorizationEngine::new(config(42));

        let a = match engine.train(&votes, &HashMap::new()) {
            TrainingOutcome::Trained(m) => m,
            _ => panic!("expected training"),
        };
        let b = match engine.train(&votes, &HashMap::new()) {
            TrainingOutcome::Trained(m) => m,
            _ => panic!("expected training"),
        };

        assert_eq!(a.epochs_run, b.epochs_run);
        for (id, factors) in &a.user_factors {
            assert_eq!(factors, &b.user_factors[id]);
        }
    }

    #[test]
    fn training_reduces_reconstruction_error() {
        let (_, _, votes) = polarized_votes();
        let engine = FactorizationEngine::new(config(7));

        let model = match engine.train(&votes, &HashMap::new()) {
            TrainingOutcome::Trained(m) => m,
            _ => panic!("expected training"),
        };

        // Perfectly polarized data is low-rank; the fit should
        // reconstruct most votes with the right sign.
        let mut correct = 0usize;
        for vote in &votes {
            let fu = model.user_factors[&vote.user_id];
            let fc = model.comment_factors[&vote.comment_id];
            let prediction: f64 = (0..2).map(|k| fu[k] * fc[k]).sum();
            if prediction.signum() == vote.value.signum() {
                correct += 1;
            }
        }
        assert!(
            correct * 10 >= votes.len() * 9,
            "only {}/{} votes reconstructed",
            correct,
            votes.len()
        );
        assert!(model.final_loss.is_finite());
        assert!(model.epochs_run >= 1);
    }

    #[test]
    fn pull_coordinates_anchor_users() {
        let (users, _, votes) = polarized_votes();

        let mut pull = HashMap::new();
        let anchor = Coords::new(3.0, -2.0);
        pull.insert(users[0], anchor);

        let mut cfg = config(11);
        cfg.pull_lambda = 5.0; // strong anchor for the test
        let engine = FactorizationEngine::new(cfg);

        let anchored = match engine.train(&votes, &pull) {
            TrainingOutcome::Trained(m) => m,
            _ => panic!("expected training"),
        };
        let free = match FactorizationEngine::new(config(11)).train(&votes, &HashMap::new()) {
            TrainingOutcome::Trained(m) => m,
            _ => panic!("expected training"),
        };

        let dist = |f: [f64; 2]| {
            let dx = f[0] - anchor.x;
            let dy = f[1] - anchor.y;
            (dx * dx + dy * dy).sqrt()
        };

        assert!(
            dist(anchored.user_factors[&users[0]]) < dist(free.user_factors[&users[0]]),
            "pull term did not move the anchored user toward the target"
        );
    }

    #[test]
    fn counts_reported_accurately() {
        let (users, comments, votes) = polarized_votes();
        let engine = FactorizationEngine::new(config(3));

        let model = match engine.train(&votes, &HashMap::new()) {
            TrainingOutcome::Trained(m) => m,
            _ => panic!("expected training"),
        };

        assert_eq!(model.n_users, users.len());
        assert_eq!(model.n_comments, comments.len());
        assert_eq!(model.n_votes, votes.len());
        assert_eq!(model.user_factors.len(), users.len());
        assert_eq!(model.comment_factors.len(), comments.len());
    }
}
