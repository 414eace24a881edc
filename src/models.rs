pub mod activities;
pub mod ad_views;
pub mod profiles;
pub mod referrals;
