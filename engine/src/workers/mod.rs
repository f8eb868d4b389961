pub mod catalog_poller;
