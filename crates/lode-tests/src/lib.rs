//! Scenario test suite for Lode.
//!
//! Integration tests drive several processors against each other the way
//! competing miners and syncing peers would: forks, reorgs back and forth,
//! double spends, pruning boundaries and snapshot bootstrap. Shared
//! construction code lives in [`helpers`].

pub mod helpers;
