pub mod approval;
pub mod delegation;
pub mod initiation;
pub mod onboarding;
pub mod reminder;
pub mod user;
