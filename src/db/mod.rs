pub mod client;
pub mod submission_repo;

pub use client::MongoClient;
pub use submission_repo::MongoSubmissionRepository;
