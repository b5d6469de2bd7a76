use papermill::store::Outcome;

use super::*;

mod analysis;
mod batch_delivery;
