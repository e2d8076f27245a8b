use crate::lease::LeaseError;

#[derive(thiserror::Error, Debug)]
pub enum IfaceError {
  #[error("no lease manager installed")]
  NoLeaseManager,
  #[error("lease acquisition failed")]
  Lease(#[from] LeaseError),
}
