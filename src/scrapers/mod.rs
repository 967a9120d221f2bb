pub mod oddsshark;
