pub mod scripted_page;
