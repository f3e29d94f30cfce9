//! Repository implementations for database operations.

mod job_repo;
mod lock_repo;
mod locker_repo;
mod notification_repo;

pub use job_repo::JobRepository;
pub use lock_repo::LockRepository;
pub use locker_repo::LockerRepository;
pub use notification_repo::NotificationRepository;
