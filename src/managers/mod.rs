pub mod verification_manager;

pub use verification_manager::{
    create_shared_verification_manager, AdminIdentity, ApproveRequest, PageParams, PendingPage,
    SharedVerificationManager, StatusView, SubmitReceipt, SubmitRequest,
};
