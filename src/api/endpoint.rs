pub type Endpoint = str;

pub const API_URL: &str = "https://www.solaxcloud.com/proxyApp/proxy/api";

pub const REALTIME_INFO: &Endpoint = "/getRealtimeInfo.do";
