//! HTTP handlers for the provisioning API.

pub mod distribution_lists;
pub mod health;
pub mod sites;

pub use distribution_lists::{
    create_distribution_list, delete_distribution_list, get_distribution_list,
    update_distribution_list,
};
pub use health::health;
pub use sites::{
    add_members, add_owners, create_site, delete_site, get_site_status, remove_members,
    remove_owners,
};
