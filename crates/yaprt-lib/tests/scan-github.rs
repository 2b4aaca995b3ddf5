use httpmock::prelude::*;
use httpmock::Method::HEAD;
use serde_json::json;

use yaprt::pipeline;
use yaprt::remote::GithubSource;
use yaprt::report::BranchEntry;
use yaprt::{Report, RetryPolicy};

const NOVA: &str = "https://example.com/acme/nova.git";
const OSLO: &str = "https://example.com/acme/oslo.git";

#[test]
fn scan_github_organisation() {
	let server = MockServer::start();

	let first_page = server.mock(|when, then| {
		when.method(GET).path("/orgs/acme/repos").query_param("page", "1");
		then.status(200)
			.header("Link", format!("<{}>; rel=\"next\"", server.url("/orgs/acme/repos?page=2")).as_str())
			.json_body(json!([{
				"name": "Nova", "full_name": "acme/nova", "clone_url": NOVA, "url": server.url("/repos/acme/nova")
			}]));
	});
	let second_page = server.mock(|when, then| {
		when.method(GET).path("/orgs/acme/repos").query_param("page", "2");
		then.status(200).json_body(json!([{
			"name": "oslo", "full_name": "acme/oslo", "clone_url": OSLO, "url": server.url("/repos/acme/oslo")
		}]));
	});

	server.mock(|when, then| {
		when.method(GET).path("/repos/acme/nova/branches");
		then.status(200).json_body(json!([{ "name": "master" }]));
	});
	server.mock(|when, then| {
		when.method(GET).path("/repos/acme/nova/tags");
		then.status(200).json_body(json!([{ "name": "1.0" }, { "name": "0.1" }]));
	});
	server.mock(|when, then| {
		when.method(GET).path("/repos/acme/oslo/branches");
		then.status(200).json_body(json!([]));
	});
	server.mock(|when, then| {
		when.method(GET).path("/repos/acme/oslo/tags");
		then.status(200).json_body(json!([]));
	});

	let requirements = "six>=1.9\n-e git+https://example.com/acme/oslo.git@master#egg=oslo\n";
	server.mock(|when, then| {
		when.method(HEAD).path("/raw/acme/nova/master/requirements.txt");
		then.status(200);
	});
	let requirements_read = server.mock(|when, then| {
		when.method(GET).path("/raw/acme/nova/master/requirements.txt");
		then.status(200).body(requirements);
	});
	server.mock(|when, then| {
		when.method(HEAD).path("/raw/acme/nova/master/setup.py");
		then.status(200);
	});
	server.mock(|when, then| {
		when.method(HEAD).path("/raw/acme/nova/1.0/setup.py");
		then.status(200);
	});
	let old_tag = server.mock(|when, then| {
		when.method(HEAD).path("/raw/acme/nova/0.1/setup.py");
		then.status(404);
	});
	/* every other requirement file is answered with a 404 */
	let missing_tests = server.mock(|when, then| {
		when.method(HEAD).path("/raw/acme/nova/master/test-requirements.txt");
		then.status(404);
	});

	let source = GithubSource::new(RetryPolicy::never())
		.expect("failed to create client")
		.with_raw_base(server.url("/raw"))
		.with_release_discovery(true);
	let mut report = Report::new();
	let links = pipeline::scan_github(&source, &[server.url("/orgs/acme/repos?page=1")], &mut report).expect("scan failed");

	first_page.assert();
	second_page.assert();
	requirements_read.assert();
	old_tag.assert();
	missing_tests.assert();

	assert_eq!(links.len(), 1);
	assert_eq!(links[0].url, OSLO);

	let nova = &report.repos["nova"];
	assert_eq!(nova.git_url.as_deref(), Some(NOVA));
	assert_eq!(nova.releases, vec![format!("git+{}@1.0", NOVA)]);
	match &nova.branches["master"] {
		BranchEntry::Resolved(branch) => {
			assert_eq!(branch.requirements["base_requirements"], vec!["six>=1.9"]);
			assert!(!branch.requirements.contains_key("test_requirements"));
			assert_eq!(branch.pip_install_url.as_deref(), Some(format!("git+{}@master", NOVA).as_str()));
		},
		other => panic!("master is not resolved: {:?}", other),
	}

	let oslo = &report.repos["oslo"];
	assert!(oslo.branches.is_empty());
	assert!(oslo.releases.is_empty());
}

#[test]
fn scan_github_single_branch_without_setup() {
	let server = MockServer::start();
	server.mock(|when, then| {
		when.method(HEAD).path("/raw/acme/oslo/stable/kilo/test-requirements.txt");
		then.status(200);
	});
	server.mock(|when, then| {
		when.method(GET).path("/raw/acme/oslo/stable/kilo/test-requirements.txt");
		then.status(200).body("mock\n");
	});
	let branches = server.mock(|when, then| {
		when.method(GET).path("/repos/acme/oslo/branches");
		then.status(200).json_body(json!([{ "name": "master" }]));
	});

	let source = GithubSource::new(RetryPolicy::never()).expect("failed to create client").with_raw_base(server.url("/raw"));
	let repos: Vec<yaprt::remote::GithubRepo> = serde_json::from_value(json!([{
		"name": "oslo", "full_name": "acme/oslo", "clone_url": OSLO, "url": server.url("/repos/acme/oslo")
	}])).expect("bad repo");
	let scan = source.scan_repo(&repos[0], Some("stable/kilo")).expect("scan failed");

	/* only the requested branch is read */
	branches.assert_hits(0);
	assert_eq!(scan.name, "oslo");
	match &scan.entry.branches["stable/kilo"] {
		BranchEntry::Resolved(branch) => {
			assert_eq!(branch.requirements["test_requirements"], vec!["mock"]);
			assert_eq!(branch.pip_install_url, None);
		},
		other => panic!("stable/kilo is not resolved: {:?}", other),
	}
}
