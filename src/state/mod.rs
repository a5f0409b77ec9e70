pub mod database;
pub mod records;

pub use database::{create_shared_database, Database, SharedDatabase};
pub use records::{
    ConfirmedRegistration, PendingVerification, RegistrationData, VerificationStatus,
};
